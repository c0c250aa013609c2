//! Custom links inside free-form properties
//!
//! A key `<label>.<Type>@iot.id` inside a custom-properties payload is a
//! reference to an entity of `<Type>`. On the way out a navigation link is
//! added next to it; on the way in the derived keys are stripped so only the
//! id is stored.

use crate::config::CustomLinkSettings;
use crate::core::version::Version;
use crate::model::{Entity, ModelRegistry, PkValue};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Expands and cleans custom links for one registry
#[derive(Clone)]
pub struct CustomLinkExpander {
    registry: Arc<ModelRegistry>,
    enabled: bool,
    max_depth: usize,
}

impl CustomLinkExpander {
    pub fn new(registry: Arc<ModelRegistry>, settings: &CustomLinkSettings) -> Self {
        Self {
            registry,
            enabled: settings.enabled,
            max_depth: settings.recurse_depth,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Add `<label>.<Type>@iot.navigationLink` next to every custom link of
    /// every custom-properties field of `entity`
    pub fn expand_custom_links(&self, entity: &mut Entity, service_root_url: &str, version: Version) {
        if !self.enabled {
            return;
        }
        let fields = custom_fields(entity);
        for field in fields {
            if let Some(Value::Object(map)) = entity.property_mut(&field) {
                self.expand_map(map, service_root_url.trim_end_matches('/'), version, 0);
            }
        }
    }

    /// Remove resolved objects and navigation links of custom links, keeping
    /// only the id keys
    pub fn clean_properties_map(&self, entity: &mut Entity) {
        if !self.enabled {
            return;
        }
        let fields = custom_fields(entity);
        for field in fields {
            if let Some(Value::Object(map)) = entity.property_mut(&field) {
                self.clean_map(map, 0);
            }
        }
    }

    fn expand_map(&self, map: &mut Map<String, Value>, root: &str, version: Version, depth: usize) {
        let mut links = Vec::new();
        for (key, value) in map.iter_mut() {
            match value {
                Value::Number(_) | Value::String(_) => {
                    if let Some(link) = self.registry.match_custom_link(key) {
                        let id = PkValue::single(value.clone());
                        links.push((
                            link.navigation_link_name(),
                            format!(
                                "{root}/{version}/{}({})",
                                link.target_type.plural(),
                                id.to_url_string()
                            ),
                        ));
                    }
                }
                Value::Object(nested) if depth < self.max_depth => {
                    self.expand_map(nested, root, version, depth + 1);
                }
                _ => {}
            }
        }
        for (key, link) in links {
            map.insert(key, Value::String(link));
        }
    }

    fn clean_map(&self, map: &mut Map<String, Value>, depth: usize) {
        let mut derived = Vec::new();
        for (key, value) in map.iter() {
            if !matches!(value, Value::Number(_) | Value::String(_)) {
                continue;
            }
            if let Some(link) = self.registry.match_custom_link(key) {
                derived.push(link.base_name());
                derived.push(link.navigation_link_name());
            }
        }
        for key in derived {
            map.remove(&key);
        }
        if depth < self.max_depth {
            for value in map.values_mut() {
                if let Value::Object(nested) = value {
                    self.clean_map(nested, depth + 1);
                }
            }
        }
    }
}

fn custom_fields(entity: &Entity) -> Vec<String> {
    entity
        .entity_type()
        .entity_properties()
        .iter()
        .filter(|p| p.has_custom_properties())
        .map(|p| p.name().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreSettings;
    use crate::plugins::PluginManager;
    use serde_json::json;

    fn setup(depth: usize) -> (Arc<ModelRegistry>, CustomLinkExpander) {
        let registry = Arc::new(
            PluginManager::with_defaults()
                .build_registry(&CoreSettings::default())
                .unwrap(),
        );
        let expander = CustomLinkExpander::new(
            registry.clone(),
            &CustomLinkSettings {
                enabled: true,
                recurse_depth: depth,
            },
        );
        (registry, expander)
    }

    fn thing_with(registry: &ModelRegistry, properties: Value) -> Entity {
        let ty = registry.entity_type_for_name("Thing").unwrap();
        Entity::new(ty.clone()).with_property("properties", properties)
    }

    #[test]
    fn test_expand_then_clean() {
        let (registry, expander) = setup(0);
        let mut thing = thing_with(&registry, json!({"owner.Thing@iot.id": 5, "colour": "red"}));

        expander.expand_custom_links(&mut thing, "http://x.org/", Version::V1_1);
        let props = thing.property("properties").unwrap();
        assert_eq!(props["owner.Thing@iot.id"], json!(5));
        assert_eq!(
            props["owner.Thing@iot.navigationLink"],
            json!("http://x.org/v1.1/Things(5)")
        );

        thing
            .property_mut("properties")
            .unwrap()
            .as_object_mut()
            .unwrap()
            .insert("owner.Thing".to_string(), json!({"@iot.id": 5}));
        expander.clean_properties_map(&mut thing);
        assert_eq!(
            thing.property("properties").unwrap(),
            &json!({"owner.Thing@iot.id": 5, "colour": "red"})
        );
    }

    #[test]
    fn test_string_ids_are_quoted() {
        let (registry, expander) = setup(0);
        let mut thing = thing_with(&registry, json!({"home.Location@iot.id": "abc"}));
        expander.expand_custom_links(&mut thing, "http://x.org", Version::V1_0);
        assert_eq!(
            thing.property("properties").unwrap()["home.Location@iot.navigationLink"],
            json!("http://x.org/v1.0/Locations('abc')")
        );
    }

    #[test]
    fn test_depth_limit() {
        let nested = json!({"a": {"s.Sensor@iot.id": 1, "b": {"t.Thing@iot.id": 2}}});

        let (registry, shallow) = setup(0);
        let mut thing = thing_with(&registry, nested.clone());
        shallow.expand_custom_links(&mut thing, "http://x.org", Version::V1_1);
        assert_eq!(thing.property("properties").unwrap(), &nested);

        let (registry, deep) = setup(1);
        let mut thing = thing_with(&registry, nested.clone());
        deep.expand_custom_links(&mut thing, "http://x.org", Version::V1_1);
        let props = thing.property("properties").unwrap();
        assert!(props["a"].get("s.Sensor@iot.navigationLink").is_some());
        assert!(props["a"]["b"].get("t.Thing@iot.navigationLink").is_none());
    }

    #[test]
    fn test_lists_and_objects_are_not_links() {
        let (registry, expander) = setup(3);
        let payload = json!({"x.Thing@iot.id": [1, 2], "y.Thing@iot.id": {"id": 1}});
        let mut thing = thing_with(&registry, payload.clone());
        expander.expand_custom_links(&mut thing, "http://x.org", Version::V1_1);
        let props = thing.property("properties").unwrap();
        assert!(props.get("x.Thing@iot.navigationLink").is_none());
        assert!(props.get("y.Thing@iot.navigationLink").is_none());

        let payload = json!({
            "x.Thing@iot.id": [1, 2],
            "x.Thing": {"kept": true},
            "y.Thing@iot.id": {"id": 1},
            "y.Thing@iot.navigationLink": "kept"
        });
        let mut thing = thing_with(&registry, payload.clone());
        expander.clean_properties_map(&mut thing);
        assert_eq!(thing.property("properties").unwrap(), &payload);
    }

    #[test]
    fn test_disabled_is_noop() {
        let registry = Arc::new(
            PluginManager::with_defaults()
                .build_registry(&CoreSettings::default())
                .unwrap(),
        );
        let expander = CustomLinkExpander::new(registry.clone(), &CustomLinkSettings::default());
        let payload = json!({"owner.Thing@iot.id": 5, "owner.Thing": {}});
        let mut thing = thing_with(&registry, payload.clone());
        expander.expand_custom_links(&mut thing, "http://x.org", Version::V1_1);
        expander.clean_properties_map(&mut thing);
        assert_eq!(thing.property("properties").unwrap(), &payload);
    }
}
