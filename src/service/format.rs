//! Result formatting
//!
//! Formatters turn a [`ResultValue`] into the response body. They are looked
//! up by the `$format` name; the JSON formatter is the default.

use crate::core::error::{RequestError, StaResult};
use crate::links::{navigation_link, relative_path, self_link};
use crate::model::property::{ID_JSON, SELF_LINK_JSON};
use crate::model::{Entity, NavigationValue};
use crate::path::ResourcePath;
use crate::persistence::ResultValue;
use crate::query::{Metadata, Query};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use std::sync::Arc;

pub const DEFAULT_FORMAT: &str = "json";

/// What a formatter needs besides the result
pub struct FormatContext<'a> {
    pub path: &'a ResourcePath,
    pub query: &'a Query,
    /// Absolute URL of the request, without query
    pub request_url: &'a str,
    pub next_link: Option<&'a str>,
    pub use_absolute_links: bool,
}

impl FormatContext<'_> {
    /// Navigation links are relative to the request URL unless absolute
    /// links are configured
    fn link(&self, absolute: String) -> String {
        if self.use_absolute_links {
            return absolute;
        }
        let root = self.path.service_root_url();
        match (
            absolute.strip_prefix(root),
            self.request_url.strip_prefix(root),
        ) {
            (Some(target), Some(base)) => relative_path(target, base),
            _ => absolute,
        }
    }
}

/// Renders results for one output format
pub trait ResultFormatter: Send + Sync {
    fn content_type(&self) -> &str;

    fn format(&self, ctx: &FormatContext<'_>, result: &ResultValue) -> StaResult<Value>;
}

/// The SensorThings JSON encoding
pub struct JsonFormatter;

impl JsonFormatter {
    fn entity(&self, ctx: &FormatContext<'_>, entity: &Entity, select: &[String]) -> Value {
        let link = self_link(ctx.path.service_root_url(), ctx.path.version(), entity);
        if ctx.path.is_ref() {
            return json!({ SELF_LINK_JSON: link });
        }

        let selected = |name: &str| select.is_empty() || select.iter().any(|s| s == name);
        let entity_type = entity.entity_type();
        let metadata = ctx.query.metadata;
        let mut map = Map::new();

        if let Some(id) = entity.id() {
            if selected(entity_type.primary_key().name()) {
                map.insert(ID_JSON.to_string(), id.to_json());
            }
        }
        if metadata != Metadata::Off {
            if let Some(link) = &link {
                map.insert(SELF_LINK_JSON.to_string(), Value::String(link.clone()));
            }
        }
        for p in entity_type.entity_properties() {
            if p.is_id() || !selected(p.name()) {
                continue;
            }
            if let Some(value) = entity.property(p.name()) {
                map.insert(p.json_name().to_string(), value.clone());
            }
        }
        for nav in entity_type
            .navigation_to_one()
            .iter()
            .chain(entity_type.navigation_to_many())
        {
            match entity.navigation(nav.name()) {
                Some(NavigationValue::One(related)) => {
                    map.insert(nav.name().to_string(), self.entity(ctx, related, &[]));
                }
                Some(NavigationValue::Many(list)) => {
                    let items = list.iter().map(|e| self.entity(ctx, e, &[])).collect();
                    map.insert(nav.name().to_string(), Value::Array(items));
                }
                None => {
                    let wanted = matches!(metadata, Metadata::Full | Metadata::Default);
                    if let (true, Some(link)) = (wanted && selected(nav.name()), &link) {
                        map.insert(
                            nav.navigation_link_name(),
                            Value::String(ctx.link(navigation_link(link, nav.name()))),
                        );
                    }
                }
            }
        }
        Value::Object(map)
    }
}

impl ResultFormatter for JsonFormatter {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn format(&self, ctx: &FormatContext<'_>, result: &ResultValue) -> StaResult<Value> {
        Ok(match result {
            ResultValue::Entity(entity) => self.entity(ctx, entity, &ctx.query.select),
            ResultValue::EntitySet(set) => {
                let mut map = Map::new();
                if let Some(count) = set.count {
                    map.insert("@iot.count".to_string(), json!(count));
                }
                if let Some(next) = ctx.next_link {
                    map.insert("@iot.nextLink".to_string(), json!(next));
                }
                let items = set
                    .entities
                    .iter()
                    .map(|e| self.entity(ctx, e, &ctx.query.select))
                    .collect();
                map.insert("value".to_string(), Value::Array(items));
                Value::Object(map)
            }
            ResultValue::Property { name, value } => {
                if ctx.path.is_value() {
                    value.clone()
                } else {
                    json!({ name.as_str(): value })
                }
            }
        })
    }
}

/// Formatters by `$format` name
#[derive(Clone)]
pub struct FormatterRegistry {
    formatters: IndexMap<String, Arc<dyn ResultFormatter>>,
}

impl FormatterRegistry {
    /// Registry holding only the JSON formatter
    pub fn new() -> Self {
        let mut registry = Self {
            formatters: IndexMap::new(),
        };
        registry.register(DEFAULT_FORMAT, Arc::new(JsonFormatter));
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, formatter: Arc<dyn ResultFormatter>) {
        self.formatters.insert(name.into(), formatter);
    }

    /// Formatter for `$format`, the JSON one when absent
    pub fn get(&self, name: Option<&str>) -> StaResult<Arc<dyn ResultFormatter>> {
        let name = name.unwrap_or(DEFAULT_FORMAT);
        self.formatters.get(name).cloned().ok_or_else(|| {
            RequestError::UnknownFormat {
                format: name.to_string(),
            }
            .into()
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.formatters.keys().map(String::as_str).collect()
    }
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreSettings;
    use crate::core::version::Version;
    use crate::model::{ModelRegistry, PkValue};
    use crate::path::PathParser;
    use crate::persistence::EntitySetResult;
    use crate::plugins::PluginManager;

    const ROOT: &str = "http://example.org";

    fn registry() -> Arc<ModelRegistry> {
        Arc::new(
            PluginManager::with_defaults()
                .build_registry(&CoreSettings::default())
                .unwrap(),
        )
    }

    fn thing(registry: &ModelRegistry, id: i64) -> Entity {
        Entity::new(registry.entity_type_for_name("Thing").unwrap().clone())
            .with_id(PkValue::single(id))
            .with_property("name", json!("lamp"))
            .with_property("description", json!("a lamp"))
    }

    fn render(path: &str, raw_query: &str, result: &ResultValue, absolute: bool) -> Value {
        let registry = registry();
        let path = PathParser::new(registry.clone(), ROOT)
            .parse(Version::V1_1, path)
            .unwrap();
        let query = Query::parse(
            raw_query,
            path.main_entity_type().map(|t| t.as_ref()),
            &CoreSettings::default(),
        )
        .unwrap();
        let url = path.get_full_url();
        let ctx = FormatContext {
            path: &path,
            query: &query,
            request_url: &url,
            next_link: Some("next"),
            use_absolute_links: absolute,
        };
        JsonFormatter.format(&ctx, result).unwrap()
    }

    #[test]
    fn test_entity_links() {
        let registry = registry();
        let body = render(
            "/Things(1)",
            "",
            &ResultValue::Entity(thing(&registry, 1)),
            true,
        );
        assert_eq!(body["@iot.id"], json!(1));
        assert_eq!(body["@iot.selfLink"], json!("http://example.org/v1.1/Things(1)"));
        assert_eq!(
            body["Datastreams@iot.navigationLink"],
            json!("http://example.org/v1.1/Things(1)/Datastreams")
        );
    }

    #[test]
    fn test_relative_navigation_links() {
        let registry = registry();
        let set = EntitySetResult {
            entities: vec![thing(&registry, 7)],
            count: Some(1),
            next: None,
        };
        let body = render("/Things", "", &ResultValue::EntitySet(set), false);
        assert_eq!(body["@iot.count"], json!(1));
        assert_eq!(body["@iot.nextLink"], json!("next"));
        assert_eq!(
            body["value"][0]["Locations@iot.navigationLink"],
            json!("Things(7)/Locations")
        );
    }

    #[test]
    fn test_select_and_metadata_off() {
        let registry = registry();
        let body = render(
            "/Things(1)",
            "$select=name&$resultMetadata=off",
            &ResultValue::Entity(thing(&registry, 1)),
            true,
        );
        assert_eq!(body, json!({"name": "lamp"}));
    }

    #[test]
    fn test_ref_and_value_shapes() {
        let registry = registry();
        let body = render(
            "/Things(1)/$ref",
            "",
            &ResultValue::Entity(thing(&registry, 1)),
            true,
        );
        assert_eq!(body, json!({"@iot.selfLink": "http://example.org/v1.1/Things(1)"}));

        let value = ResultValue::Property {
            name: "name".to_string(),
            value: json!("lamp"),
        };
        assert_eq!(render("/Things(1)/name", "", &value, true), json!({"name": "lamp"}));
        assert_eq!(render("/Things(1)/name/$value", "", &value, true), json!("lamp"));
    }

    #[test]
    fn test_unknown_format() {
        let formatters = FormatterRegistry::new();
        assert!(formatters.get(None).is_ok());
        let err = formatters.get(Some("csv")).err().unwrap();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(formatters.names(), vec!["json"]);
    }
}
