//! Properties of entity types
//!
//! A [`Property`] is one of four closed variants: a fixed entity property, a
//! navigation property (to one entity or to a set), a dynamically named
//! custom property found inside a free-form payload, or a custom link, which
//! is a custom property whose name embeds a reference to another entity.

use std::fmt;

/// Name of the primary key property
pub const ID: &str = "id";
/// JSON name of the primary key property
pub const ID_JSON: &str = "@iot.id";
/// JSON name of the self link
pub const SELF_LINK_JSON: &str = "@iot.selfLink";
/// Suffix appended to navigation property names for link output
pub const NAVIGATION_LINK_SUFFIX: &str = "@iot.navigationLink";

/// A scalar or structured attribute stored directly on an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityPropertyMain {
    name: String,
    json_name: String,
    has_custom_properties: bool,
}

impl EntityPropertyMain {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            json_name: name.clone(),
            name,
            has_custom_properties: false,
        }
    }

    /// The primary key property, `id` / `@iot.id`
    pub fn id() -> Self {
        Self::new(ID).with_json_name(ID_JSON)
    }

    pub fn with_json_name(mut self, json_name: impl Into<String>) -> Self {
        self.json_name = json_name.into();
        self
    }

    /// Mark the property as a free-form payload that may carry custom
    /// sub-properties and custom links
    pub fn with_custom_properties(mut self) -> Self {
        self.has_custom_properties = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn json_name(&self) -> &str {
        &self.json_name
    }

    pub fn has_custom_properties(&self) -> bool {
        self.has_custom_properties
    }

    pub fn is_id(&self) -> bool {
        self.name == ID
    }
}

/// Cardinality of a navigation property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationKind {
    /// Points to a single entity
    ToOne,
    /// Points to a set of entities
    ToMany,
}

/// A typed edge from one entity type to another
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavigationPropertyMain {
    name: String,
    kind: NavigationKind,
    source_type: String,
    target_type: String,
    inverse: String,
    required: bool,
}

impl NavigationPropertyMain {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: NavigationKind,
        source_type: impl Into<String>,
        target_type: impl Into<String>,
        inverse: impl Into<String>,
        required: bool,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            source_type: source_type.into(),
            target_type: target_type.into(),
            inverse: inverse.into(),
            required,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NavigationKind {
        self.kind
    }

    pub fn is_to_one(&self) -> bool {
        self.kind == NavigationKind::ToOne
    }

    pub fn is_to_many(&self) -> bool {
        self.kind == NavigationKind::ToMany
    }

    /// Name of the entity type owning this property
    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    /// Name of the entity type this property points to
    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    /// Name of the reciprocal navigation property on the target type
    pub fn inverse_name(&self) -> &str {
        &self.inverse
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Key used in JSON output for the link to this navigation property
    pub fn navigation_link_name(&self) -> String {
        format!("{}{}", self.name, NAVIGATION_LINK_SUFFIX)
    }
}

/// An unregistered key found inside a custom-properties payload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityPropertyCustom {
    name: String,
}

impl EntityPropertyCustom {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A custom property named `<label>.<EntityType>@iot.id`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityPropertyCustomLink {
    name: String,
    label: String,
    target_type: String,
}

impl EntityPropertyCustomLink {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            target_type: target_type.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }
}

/// Any property an entity type or a custom payload can expose
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Property {
    EntityMain(EntityPropertyMain),
    NavigationMain(NavigationPropertyMain),
    Custom(EntityPropertyCustom),
    CustomLink(EntityPropertyCustomLink),
}

impl Property {
    pub fn name(&self) -> &str {
        match self {
            Property::EntityMain(p) => p.name(),
            Property::NavigationMain(p) => p.name(),
            Property::Custom(p) => p.name(),
            Property::CustomLink(p) => p.name(),
        }
    }

    pub fn as_entity_main(&self) -> Option<&EntityPropertyMain> {
        match self {
            Property::EntityMain(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_navigation(&self) -> Option<&NavigationPropertyMain> {
        match self {
            Property::NavigationMain(p) => Some(p),
            _ => None,
        }
    }

    /// True for the dynamically typed variants
    pub fn is_custom(&self) -> bool {
        matches!(self, Property::Custom(_) | Property::CustomLink(_))
    }

    /// True when a following path step must be read as a step into a
    /// free-form payload rather than a schema lookup
    pub fn continues_as_custom(&self) -> bool {
        matches!(self, Property::EntityMain(_)) || self.is_custom()
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<EntityPropertyMain> for Property {
    fn from(p: EntityPropertyMain) -> Self {
        Property::EntityMain(p)
    }
}

impl From<NavigationPropertyMain> for Property {
    fn from(p: NavigationPropertyMain) -> Self {
        Property::NavigationMain(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_property() {
        let id = EntityPropertyMain::id();
        assert!(id.is_id());
        assert_eq!(id.json_name(), "@iot.id");
    }

    #[test]
    fn test_navigation_link_name() {
        let nav = NavigationPropertyMain::new(
            "Datastreams",
            NavigationKind::ToMany,
            "Thing",
            "Datastream",
            "Thing",
            false,
        );
        assert_eq!(nav.navigation_link_name(), "Datastreams@iot.navigationLink");
        assert!(nav.is_to_many());
    }

    #[test]
    fn test_continues_as_custom() {
        let main: Property = EntityPropertyMain::new("properties")
            .with_custom_properties()
            .into();
        assert!(main.continues_as_custom());

        let custom = Property::Custom(EntityPropertyCustom::new("colour"));
        assert!(custom.continues_as_custom());

        let nav: Property = NavigationPropertyMain::new(
            "Thing",
            NavigationKind::ToOne,
            "Datastream",
            "Thing",
            "Datastreams",
            true,
        )
        .into();
        assert!(!nav.continues_as_custom());
    }
}
