//! Schema registry: entity types, properties and entity values

pub mod entity;
pub mod entity_type;
pub mod property;
pub mod registry;

pub use entity::{Entity, NavigationValue, PkValue};
pub use entity_type::{EntityType, EntityTypeBuilder, PropertyEntry};
pub use property::{
    EntityPropertyCustom, EntityPropertyCustomLink, EntityPropertyMain, NavigationKind,
    NavigationPropertyMain, Property,
};
pub use registry::{CustomLinkMatch, ModelRegistry, ModelRegistryBuilder, Relation};
