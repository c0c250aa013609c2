//! Entity values
//!
//! An [`Entity`] is an instance of an [`EntityType`]: an optional primary key,
//! property values, related entities and the set of properties that were
//! explicitly provided by the client (which drives PATCH semantics).

use super::entity_type::EntityType;
use super::property::{ID_JSON, NAVIGATION_LINK_SUFFIX, SELF_LINK_JSON};
use super::registry::ModelRegistry;
use crate::core::error::{EntityError, RequestError, StaResult};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Primary key value; composite keys carry one component per key column
#[derive(Debug, Clone, PartialEq)]
pub struct PkValue(Vec<Option<Value>>);

impl PkValue {
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![Some(value.into())])
    }

    pub fn composite(values: Vec<Option<Value>>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.0
    }

    /// Every component present and non-null
    pub fn is_fully_set(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .iter()
                .all(|v| v.as_ref().is_some_and(|v| !v.is_null()))
    }

    /// Read an `@iot.id` value from a JSON body
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(_) | Value::String(_) => Some(Self::single(value.clone())),
            Value::Array(items) => Some(Self(items.iter().cloned().map(Some).collect())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self.0.as_slice() {
            [single] => single.clone().unwrap_or(Value::Null),
            many => Value::Array(
                many.iter()
                    .map(|v| v.clone().unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }

    /// Key text as used between parentheses in URLs: `1`, `'abc'`, `1,'a'`
    pub fn to_url_string(&self) -> String {
        self.0
            .iter()
            .map(|v| match v {
                Some(Value::String(s)) => {
                    format!("'{}'", s.replace('\'', "''").replace('%', "%25"))
                }
                Some(Value::Null) | None => "null".to_string(),
                Some(other) => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for PkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_url_string())
    }
}

/// Value of a navigation property on an entity
#[derive(Debug, Clone)]
pub enum NavigationValue {
    One(Box<Entity>),
    Many(Vec<Entity>),
}

impl NavigationValue {
    pub fn entities(&self) -> Vec<&Entity> {
        match self {
            NavigationValue::One(e) => vec![e.as_ref()],
            NavigationValue::Many(list) => list.iter().collect(),
        }
    }
}

/// An instance of an entity type
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: Arc<EntityType>,
    id: Option<PkValue>,
    properties: IndexMap<String, Value>,
    navigation: IndexMap<String, NavigationValue>,
    set_properties: HashSet<String>,
}

impl Entity {
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self {
            entity_type,
            id: None,
            properties: IndexMap::new(),
            navigation: IndexMap::new(),
            set_properties: HashSet::new(),
        }
    }

    pub fn with_id(mut self, id: PkValue) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_property(mut self, name: &str, value: Value) -> Self {
        self.set_property(name, value);
        self
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub fn id(&self) -> Option<&PkValue> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: PkValue) {
        self.id = Some(id);
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn property_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.properties.get_mut(name)
    }

    pub fn properties(&self) -> &IndexMap<String, Value> {
        &self.properties
    }

    pub fn set_property(&mut self, name: &str, value: Value) {
        self.properties.insert(name.to_string(), value);
        self.set_properties.insert(name.to_string());
    }

    pub fn navigation(&self, name: &str) -> Option<&NavigationValue> {
        self.navigation.get(name)
    }

    pub fn navigations(&self) -> &IndexMap<String, NavigationValue> {
        &self.navigation
    }

    pub fn navigations_mut(&mut self) -> &mut IndexMap<String, NavigationValue> {
        &mut self.navigation
    }

    pub fn set_navigation(&mut self, name: &str, value: NavigationValue) {
        self.navigation.insert(name.to_string(), value);
        self.set_properties.insert(name.to_string());
    }

    /// Whether the client provided a value for `name`
    pub fn is_set(&self, name: &str) -> bool {
        self.set_properties.contains(name)
    }

    /// Carries an id and nothing else: a reference to an existing entity
    pub fn is_reference(&self) -> bool {
        self.id.is_some() && self.set_properties.is_empty()
    }

    /// Names of the properties the client provided
    pub fn set_property_names(&self) -> impl Iterator<Item = &str> {
        self.set_properties.iter().map(String::as_str)
    }

    /// Full-replacement semantics: every property of the type counts as
    /// provided, absent ones as null
    pub fn set_all_properties_set(&mut self) {
        for p in self.entity_type.entity_properties() {
            if p.is_id() {
                continue;
            }
            self.set_properties.insert(p.name().to_string());
            self.properties
                .entry(p.name().to_string())
                .or_insert(Value::Null);
        }
    }

    /// Read an entity from a JSON object
    pub fn from_json(
        registry: &ModelRegistry,
        entity_type: &Arc<EntityType>,
        json: &Value,
    ) -> StaResult<Entity> {
        let Value::Object(map) = json else {
            return Err(RequestError::body(format!(
                "expected a JSON object for {}",
                entity_type.name()
            ))
            .into());
        };

        let mut entity = Entity::new(entity_type.clone());
        for (key, value) in map {
            if key == ID_JSON {
                let id = PkValue::from_json(value).ok_or_else(|| {
                    RequestError::body(format!("invalid {ID_JSON} value {value}"))
                })?;
                entity.id = Some(id);
            } else if key == SELF_LINK_JSON || key.ends_with(NAVIGATION_LINK_SUFFIX) {
                // output-only keys
            } else if let Some(nav) = entity_type.navigation_property(key) {
                let target = registry.navigation_target(nav).ok_or_else(|| {
                    EntityError::illegal(format!("no target type for {}", nav.name()))
                })?;
                let nav_value = if nav.is_to_one() {
                    NavigationValue::One(Box::new(Entity::from_json(registry, target, value)?))
                } else {
                    let Value::Array(items) = value else {
                        return Err(
                            RequestError::body(format!("{key} must be a JSON array")).into()
                        );
                    };
                    NavigationValue::Many(
                        items
                            .iter()
                            .map(|item| Entity::from_json(registry, target, item))
                            .collect::<StaResult<Vec<_>>>()?,
                    )
                };
                entity.set_navigation(key, nav_value);
            } else if let Some(prop) = entity_type.entity_property_by_json(key) {
                let name = prop.name().to_string();
                entity.set_property(&name, value.clone());
            } else {
                return Err(RequestError::body(format!(
                    "unknown property '{key}' for {}",
                    entity_type.name()
                ))
                .into());
            }
        }
        Ok(entity)
    }

    /// Entity properties keyed by JSON name, without links or navigation
    pub fn to_json_properties(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(id) = &self.id {
            map.insert(ID_JSON.to_string(), id.to_json());
        }
        for p in self.entity_type.entity_properties() {
            if let Some(value) = self.properties.get(p.name()) {
                map.insert(p.json_name().to_string(), value.clone());
            }
        }
        map
    }

    /// Value reachable by a plain property path such as `["id"]` or
    /// `["properties", "colour"]`
    ///
    /// Returns `None` for navigation paths and missing values.
    pub fn value_for_path(&self, path: &[String]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        let mut current = if self.entity_type.primary_key().name() == first {
            self.id.as_ref()?.to_json()
        } else {
            self.entity_type.entity_property(first)?;
            self.properties.get(first)?.clone()
        };
        for step in rest {
            current = match current {
                Value::Object(mut map) => map.remove(step)?,
                Value::Array(mut items) => {
                    let idx: usize = step.parse().ok()?;
                    if idx >= items.len() {
                        return None;
                    }
                    items.swap_remove(idx)
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Check that everything required on create is present, recursing into
    /// nested entities that will be created along with this one
    pub fn validate_create(&self) -> StaResult<()> {
        self.validate_create_except(None)
    }

    /// `implied` names the navigation property that points back at the
    /// enclosing entity of a nested create
    fn validate_create_except(&self, implied: Option<&str>) -> StaResult<()> {
        for (name, entry) in self.entity_type.property_map() {
            if !entry.required || implied == Some(name.as_str()) {
                continue;
            }
            let present = match &entry.property {
                crate::model::Property::NavigationMain(_) => self.navigation.contains_key(name),
                _ => self.properties.get(name).is_some_and(|v| !v.is_null()),
            };
            if !present {
                return Err(EntityError::Incomplete {
                    entity_type: self.entity_type.name().to_string(),
                    field: name.clone(),
                }
                .into());
            }
        }
        for (name, value) in &self.navigation {
            let inverse = self
                .entity_type
                .navigation_property(name)
                .map(|nav| nav.inverse_name());
            for related in value.entities() {
                if related.id.is_none() {
                    related.validate_create_except(inverse)?;
                }
            }
        }
        Ok(())
    }

    /// Check that a full replacement keeps every required entity property
    pub fn validate_replace(&self) -> StaResult<()> {
        for p in self.entity_type.entity_properties() {
            let required = self.entity_type.is_required(p.name());
            if required && self.properties.get(p.name()).is_none_or(Value::is_null) {
                return Err(EntityError::Incomplete {
                    entity_type: self.entity_type.name().to_string(),
                    field: p.name().to_string(),
                }
                .into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreSettings;
    use crate::plugins::PluginManager;
    use serde_json::json;

    fn registry() -> ModelRegistry {
        PluginManager::with_defaults()
            .build_registry(&CoreSettings::default())
            .unwrap()
    }

    #[test]
    fn test_pk_value_url_forms() {
        assert_eq!(PkValue::single(1).to_url_string(), "1");
        assert_eq!(PkValue::single("o'k").to_url_string(), "'o''k'");
        let composite = PkValue::composite(vec![Some(json!(1)), Some(json!("a"))]);
        assert_eq!(composite.to_url_string(), "1,'a'");
        assert!(composite.is_fully_set());
        assert!(!PkValue::composite(vec![Some(json!(1)), None]).is_fully_set());
        assert!(!PkValue::composite(vec![]).is_fully_set());
    }

    #[test]
    fn test_from_json_with_nested_entities() {
        let registry = registry();
        let ds_type = registry.entity_type_for_name("Datastream").unwrap();
        let entity = Entity::from_json(
            &registry,
            ds_type,
            &json!({
                "name": "temp",
                "Thing": {"@iot.id": 1},
                "Observations": [{"result": 3}],
                "Sensor@iot.navigationLink": "ignored"
            }),
        )
        .unwrap();
        assert!(entity.is_set("name"));
        assert!(!entity.is_set("description"));
        match entity.navigation("Thing").unwrap() {
            NavigationValue::One(thing) => {
                assert_eq!(thing.id(), Some(&PkValue::single(1)))
            }
            _ => panic!("expected one"),
        }
        match entity.navigation("Observations").unwrap() {
            NavigationValue::Many(list) => assert_eq!(list.len(), 1),
            _ => panic!("expected many"),
        }
    }

    #[test]
    fn test_from_json_rejects_unknown_key() {
        let registry = registry();
        let thing = registry.entity_type_for_name("Thing").unwrap();
        let err = Entity::from_json(&registry, thing, &json!({"colour": "red"})).unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_validate_create_names_missing_field() {
        let registry = registry();
        let thing = registry.entity_type_for_name("Thing").unwrap();
        let entity = Entity::from_json(&registry, thing, &json!({"name": "x"})).unwrap();
        let err = entity.validate_create().unwrap_err();
        assert!(err.to_string().contains("description"));
    }

    #[test]
    fn test_set_all_properties_set() {
        let registry = registry();
        let thing = registry.entity_type_for_name("Thing").unwrap();
        let mut entity = Entity::new(thing.clone()).with_property("name", json!("a"));
        entity.set_all_properties_set();
        assert!(entity.is_set("description"));
        assert_eq!(entity.property("description"), Some(&Value::Null));
        assert!(entity.validate_replace().is_err());
    }

    #[test]
    fn test_value_for_path() {
        let registry = registry();
        let thing = registry.entity_type_for_name("Thing").unwrap();
        let entity = Entity::new(thing.clone())
            .with_id(PkValue::single(7))
            .with_property("properties", json!({"tags": ["a", "b"], "depth": {"m": 3}}));
        assert_eq!(entity.value_for_path(&["id".into()]), Some(json!(7)));
        assert_eq!(
            entity.value_for_path(&["properties".into(), "depth".into(), "m".into()]),
            Some(json!(3))
        );
        assert_eq!(
            entity.value_for_path(&["properties".into(), "tags".into(), "1".into()]),
            Some(json!("b"))
        );
        assert_eq!(entity.value_for_path(&["Datastreams".into()]), None);
    }
}
