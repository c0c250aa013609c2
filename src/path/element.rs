//! Path elements
//!
//! A parsed resource path is a sequence of [`PathElement`]s. Each element
//! refers to its parent by index into the owning
//! [`ResourcePath`](super::ResourcePath), never to its children.

use crate::model::{EntityPropertyMain, EntityType, NavigationPropertyMain, PkValue};
use std::sync::Arc;

/// A single entity, reached either directly (`Things(1)`) or through a
/// navigation property (`Datastreams(1)/Thing`)
#[derive(Debug, Clone, PartialEq)]
pub struct EntityElement {
    entity_type: Arc<EntityType>,
    navigation: Option<NavigationPropertyMain>,
    id: Option<PkValue>,
    pub(crate) parent: Option<usize>,
}

impl EntityElement {
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self {
            entity_type,
            navigation: None,
            id: None,
            parent: None,
        }
    }

    pub fn with_navigation(mut self, navigation: NavigationPropertyMain) -> Self {
        self.navigation = Some(navigation);
        self
    }

    pub fn with_id(mut self, id: PkValue) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_parent(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub fn navigation(&self) -> Option<&NavigationPropertyMain> {
        self.navigation.as_ref()
    }

    pub fn id(&self) -> Option<&PkValue> {
        self.id.as_ref()
    }

    pub fn set_id(&mut self, id: PkValue) {
        self.id = Some(id);
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Every key component present
    pub fn primary_key_fully_set(&self) -> bool {
        self.id.as_ref().is_some_and(PkValue::is_fully_set)
    }
}

/// A collection of entities (`Things`, `Things(1)/Datastreams`)
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySetElement {
    entity_type: Arc<EntityType>,
    navigation: Option<NavigationPropertyMain>,
    pub(crate) parent: Option<usize>,
}

impl EntitySetElement {
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self {
            entity_type,
            navigation: None,
            parent: None,
        }
    }

    pub fn with_navigation(mut self, navigation: NavigationPropertyMain) -> Self {
        self.navigation = Some(navigation);
        self
    }

    /// Parent must be an entity element; checked when the element is added
    pub fn with_parent(mut self, parent: usize) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    pub fn navigation(&self) -> Option<&NavigationPropertyMain> {
        self.navigation.as_ref()
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }
}

/// Any step of a resource path
#[derive(Debug, Clone, PartialEq)]
pub enum PathElement {
    Entity(EntityElement),
    EntitySet(EntitySetElement),
    /// A fixed entity property
    Property {
        property: EntityPropertyMain,
        parent: Option<usize>,
    },
    /// A step into a free-form payload
    CustomProperty { name: String, parent: Option<usize> },
    /// A step into a JSON array
    ArrayIndex { index: usize, parent: Option<usize> },
}

impl PathElement {
    pub fn property(property: EntityPropertyMain, parent: usize) -> Self {
        PathElement::Property {
            property,
            parent: Some(parent),
        }
    }

    pub fn custom_property(name: impl Into<String>, parent: usize) -> Self {
        PathElement::CustomProperty {
            name: name.into(),
            parent: Some(parent),
        }
    }

    pub fn array_index(index: usize, parent: usize) -> Self {
        PathElement::ArrayIndex {
            index,
            parent: Some(parent),
        }
    }

    pub fn parent(&self) -> Option<usize> {
        match self {
            PathElement::Entity(e) => e.parent,
            PathElement::EntitySet(e) => e.parent,
            PathElement::Property { parent, .. }
            | PathElement::CustomProperty { parent, .. }
            | PathElement::ArrayIndex { parent, .. } => *parent,
        }
    }

    pub(crate) fn parent_mut(&mut self) -> &mut Option<usize> {
        match self {
            PathElement::Entity(e) => &mut e.parent,
            PathElement::EntitySet(e) => &mut e.parent,
            PathElement::Property { parent, .. }
            | PathElement::CustomProperty { parent, .. }
            | PathElement::ArrayIndex { parent, .. } => parent,
        }
    }

    pub fn as_entity(&self) -> Option<&EntityElement> {
        match self {
            PathElement::Entity(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_entity_set(&self) -> Option<&EntitySetElement> {
        match self {
            PathElement::EntitySet(e) => Some(e),
            _ => None,
        }
    }

    /// Entity type for entity and entity set elements
    pub fn entity_type(&self) -> Option<&Arc<EntityType>> {
        match self {
            PathElement::Entity(e) => Some(e.entity_type()),
            PathElement::EntitySet(e) => Some(e.entity_type()),
            _ => None,
        }
    }

    /// Entity element carrying a key
    pub fn is_identified_entity(&self) -> bool {
        matches!(self, PathElement::Entity(e) if e.id.is_some())
    }

    /// Name of the segment as it appears in URLs
    pub fn segment_name(&self) -> String {
        match self {
            PathElement::Entity(e) => e
                .navigation()
                .map(|n| n.name().to_string())
                .unwrap_or_else(|| e.entity_type().plural().to_string()),
            PathElement::EntitySet(e) => e
                .navigation()
                .map(|n| n.name().to_string())
                .unwrap_or_else(|| e.entity_type().plural().to_string()),
            PathElement::Property { property, .. } => property.name().to_string(),
            PathElement::CustomProperty { name, .. } => name.clone(),
            PathElement::ArrayIndex { index, .. } => format!("[{index}]"),
        }
    }
}
