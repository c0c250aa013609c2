//! Entity type descriptors
//!
//! An [`EntityType`] is immutable once its registry is frozen. Types are
//! assembled through an [`EntityTypeBuilder`] during startup; plugins may add
//! properties to builders registered by other plugins until
//! [`ModelRegistryBuilder::build`](super::ModelRegistryBuilder::build) runs.

use super::property::{EntityPropertyMain, NavigationPropertyMain, Property};
use crate::core::error::ModelError;
use crate::core::pluralize::Pluralizer;
use indexmap::IndexMap;

/// A property of a type together with its required-on-create flag
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    pub property: Property,
    pub required: bool,
}

/// Frozen descriptor of one entity type
#[derive(Debug)]
pub struct EntityType {
    name: String,
    plural: String,
    properties: IndexMap<String, PropertyEntry>,
    entity_properties: Vec<EntityPropertyMain>,
    navigation_to_one: Vec<NavigationPropertyMain>,
    navigation_to_many: Vec<NavigationPropertyMain>,
}

impl EntityType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection name used in URLs (e.g. `Things`)
    pub fn plural(&self) -> &str {
        &self.plural
    }

    /// Every registered property with its required flag, in registration order
    pub fn property_map(&self) -> &IndexMap<String, PropertyEntry> {
        &self.properties
    }

    pub fn entity_properties(&self) -> &[EntityPropertyMain] {
        &self.entity_properties
    }

    pub fn navigation_to_one(&self) -> &[NavigationPropertyMain] {
        &self.navigation_to_one
    }

    pub fn navigation_to_many(&self) -> &[NavigationPropertyMain] {
        &self.navigation_to_many
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name).map(|e| &e.property)
    }

    pub fn entity_property(&self, name: &str) -> Option<&EntityPropertyMain> {
        self.property(name).and_then(Property::as_entity_main)
    }

    /// Look up an entity property by its JSON key (`@iot.id` or `name`)
    pub fn entity_property_by_json(&self, json_name: &str) -> Option<&EntityPropertyMain> {
        self.entity_properties
            .iter()
            .find(|p| p.json_name() == json_name)
    }

    pub fn navigation_property(&self, name: &str) -> Option<&NavigationPropertyMain> {
        self.property(name).and_then(Property::as_navigation)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.properties.get(name).is_some_and(|e| e.required)
    }

    pub fn primary_key(&self) -> &EntityPropertyMain {
        // Every builder starts with the id property.
        &self.entity_properties[0]
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for EntityType {}

/// Mutable description of an entity type during registration
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    name: String,
    plural: String,
    properties: IndexMap<String, PropertyEntry>,
}

impl EntityTypeBuilder {
    /// Start a type with the given name; the plural defaults to the English
    /// plural of the name and the id property is registered first
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut properties = IndexMap::new();
        let id = EntityPropertyMain::id();
        properties.insert(
            id.name().to_string(),
            PropertyEntry {
                property: id.into(),
                required: false,
            },
        );
        Self {
            plural: Pluralizer::pluralize(&name),
            name,
            properties,
        }
    }

    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// Chainable variant of [`add_property`](Self::add_property) for
    /// definitions that cannot clash
    pub fn property(mut self, property: EntityPropertyMain, required: bool) -> Self {
        self.properties.insert(
            property.name().to_string(),
            PropertyEntry {
                property: property.into(),
                required,
            },
        );
        self
    }

    pub fn add_property(
        &mut self,
        property: EntityPropertyMain,
        required: bool,
    ) -> Result<(), ModelError> {
        self.insert(property.into(), required)
    }

    pub(crate) fn add_navigation(
        &mut self,
        navigation: NavigationPropertyMain,
    ) -> Result<(), ModelError> {
        let required = navigation.is_required();
        self.insert(navigation.into(), required)
    }

    fn insert(&mut self, property: Property, required: bool) -> Result<(), ModelError> {
        let key = property.name().to_string();
        if self.properties.contains_key(&key) {
            return Err(ModelError::DuplicateProperty {
                entity_type: self.name.clone(),
                property: key,
            });
        }
        self.properties.insert(key, PropertyEntry { property, required });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn plural_name(&self) -> &str {
        &self.plural
    }

    /// Freeze: split the property map into the fast lookup lists
    pub(crate) fn freeze(self) -> EntityType {
        let mut entity_properties = Vec::new();
        let mut navigation_to_one = Vec::new();
        let mut navigation_to_many = Vec::new();
        for entry in self.properties.values() {
            match &entry.property {
                Property::EntityMain(p) => entity_properties.push(p.clone()),
                Property::NavigationMain(n) if n.is_to_one() => navigation_to_one.push(n.clone()),
                Property::NavigationMain(n) => navigation_to_many.push(n.clone()),
                Property::Custom(_) | Property::CustomLink(_) => {}
            }
        }
        EntityType {
            name: self.name,
            plural: self.plural,
            properties: self.properties,
            entity_properties,
            navigation_to_one,
            navigation_to_many,
        }
    }
}
