//! Schema registry
//!
//! Registration is two-phase: plugins add entity types and relations to a
//! [`ModelRegistryBuilder`], then [`ModelRegistryBuilder::build`] freezes
//! everything into an immutable [`ModelRegistry`]. Lookups on the frozen
//! registry never change, so a property map read twice is the same map.

use super::entity_type::{EntityType, EntityTypeBuilder};
use super::property::{NavigationKind, NavigationPropertyMain};
use crate::core::error::ModelError;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Suffix of custom link keys
pub const CUSTOM_LINK_ID_SUFFIX: &str = "@iot.id";

/// A bidirectional relation between two entity types
///
/// Registering a relation registers both navigation properties, so the
/// schema is symmetric by construction.
#[derive(Debug, Clone)]
pub struct Relation {
    source_type: String,
    name: String,
    kind: NavigationKind,
    required: bool,
    target_type: String,
    inverse_name: String,
    inverse_kind: NavigationKind,
    inverse_required: bool,
}

impl Relation {
    /// `source_type.name` points to `target_type`; the reciprocal property
    /// is `target_type.inverse_name`
    pub fn new(
        source_type: impl Into<String>,
        name: impl Into<String>,
        kind: NavigationKind,
        target_type: impl Into<String>,
        inverse_name: impl Into<String>,
        inverse_kind: NavigationKind,
    ) -> Self {
        Self {
            source_type: source_type.into(),
            name: name.into(),
            kind,
            required: false,
            target_type: target_type.into(),
            inverse_name: inverse_name.into(),
            inverse_kind,
            inverse_required: false,
        }
    }

    /// The forward navigation property must be set on create
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The inverse navigation property must be set on create
    pub fn inverse_required(mut self) -> Self {
        self.inverse_required = true;
        self
    }
}

/// Result of matching a key against the custom link pattern
#[derive(Debug, Clone, PartialEq)]
pub struct CustomLinkMatch<'a> {
    /// Part before the type name
    pub label: String,
    /// The referenced type
    pub target_type: &'a Arc<EntityType>,
}

impl CustomLinkMatch<'_> {
    /// `<label>.<Type>`, the key of a resolved (expanded) object
    pub fn base_name(&self) -> String {
        format!("{}.{}", self.label, self.target_type.name())
    }

    /// `<label>.<Type>@iot.navigationLink`
    pub fn navigation_link_name(&self) -> String {
        format!(
            "{}{}",
            self.base_name(),
            super::property::NAVIGATION_LINK_SUFFIX
        )
    }
}

/// Mutable registry used during startup
#[derive(Debug, Default)]
pub struct ModelRegistryBuilder {
    types: IndexMap<String, EntityTypeBuilder>,
    relations: Vec<Relation>,
}

impl ModelRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bare entity type
    pub fn register_entity_type(&mut self, builder: EntityTypeBuilder) -> Result<(), ModelError> {
        let key = builder.name().to_lowercase();
        let plural_taken = self
            .types
            .values()
            .any(|t| t.plural_name().eq_ignore_ascii_case(builder.plural_name()));
        if self.types.contains_key(&key) || plural_taken {
            return Err(ModelError::DuplicateEntityType {
                name: builder.name().to_string(),
            });
        }
        tracing::debug!(entity_type = builder.name(), "registered entity type");
        self.types.insert(key, builder);
        Ok(())
    }

    pub fn has_entity_type(&self, name: &str) -> bool {
        self.types.contains_key(&name.to_lowercase())
    }

    /// Access a registered type to add properties to it
    pub fn entity_type_mut(&mut self, name: &str) -> Option<&mut EntityTypeBuilder> {
        self.types.get_mut(&name.to_lowercase())
    }

    /// Register a relation; both ends must already be registered
    pub fn register_relation(&mut self, relation: Relation) -> Result<(), ModelError> {
        for name in [&relation.source_type, &relation.target_type] {
            if !self.has_entity_type(name) {
                return Err(ModelError::UnknownEntityType { name: name.clone() });
            }
        }
        self.relations.push(relation);
        Ok(())
    }

    /// Freeze the registry
    pub fn build(mut self) -> Result<ModelRegistry, ModelError> {
        for relation in std::mem::take(&mut self.relations) {
            let forward = NavigationPropertyMain::new(
                relation.name.clone(),
                relation.kind,
                relation.source_type.clone(),
                relation.target_type.clone(),
                relation.inverse_name.clone(),
                relation.required,
            );
            let inverse = NavigationPropertyMain::new(
                relation.inverse_name.clone(),
                relation.inverse_kind,
                relation.target_type.clone(),
                relation.source_type.clone(),
                relation.name.clone(),
                relation.inverse_required,
            );
            self.builder_for(&relation.source_type)?
                .add_navigation(forward)?;
            self.builder_for(&relation.target_type)?
                .add_navigation(inverse)?;
        }

        let mut types = Vec::with_capacity(self.types.len());
        let mut by_name = HashMap::new();
        let mut by_plural = HashMap::new();
        for (key, builder) in self.types {
            let ty = Arc::new(builder.freeze());
            by_name.insert(key, types.len());
            by_plural.insert(ty.plural().to_string(), types.len());
            types.push(ty);
        }

        let custom_link_pattern = build_custom_link_pattern(&types)?;
        Ok(ModelRegistry {
            types,
            by_name,
            by_plural,
            custom_link_pattern,
        })
    }

    fn builder_for(&mut self, name: &str) -> Result<&mut EntityTypeBuilder, ModelError> {
        self.types
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| ModelError::UnknownEntityType {
                name: name.to_string(),
            })
    }
}

fn build_custom_link_pattern(types: &[Arc<EntityType>]) -> Result<Regex, ModelError> {
    let alternation = types
        .iter()
        .map(|t| regex::escape(t.name()))
        .collect::<Vec<_>>()
        .join("|");
    // With no types registered the alternation must never match.
    let alternation = if alternation.is_empty() {
        "[^\\s\\S]".to_string()
    } else {
        alternation
    };
    let pattern = format!(
        "^(.+)\\.({alternation}){}$",
        regex::escape(CUSTOM_LINK_ID_SUFFIX)
    );
    Regex::new(&pattern).map_err(|e| ModelError::Pattern {
        message: e.to_string(),
    })
}

/// Frozen schema registry
#[derive(Debug)]
pub struct ModelRegistry {
    types: Vec<Arc<EntityType>>,
    by_name: HashMap<String, usize>,
    by_plural: HashMap<String, usize>,
    custom_link_pattern: Regex,
}

impl ModelRegistry {
    /// Case-insensitive lookup by type name
    pub fn entity_type_for_name(&self, name: &str) -> Option<&Arc<EntityType>> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&idx| &self.types[idx])
    }

    /// Lookup by collection name as it appears in URLs
    pub fn entity_type_for_plural(&self, plural: &str) -> Option<&Arc<EntityType>> {
        self.by_plural.get(plural).map(|&idx| &self.types[idx])
    }

    pub fn entity_types(&self) -> &[Arc<EntityType>] {
        &self.types
    }

    /// Precompiled `^(.+)\.(Type1|Type2|...)@iot\.id$` pattern
    pub fn custom_link_pattern(&self) -> &Regex {
        &self.custom_link_pattern
    }

    /// Match a payload key against the custom link naming rule
    pub fn match_custom_link(&self, key: &str) -> Option<CustomLinkMatch<'_>> {
        let caps = self.custom_link_pattern.captures(key)?;
        let target_type = self.entity_type_for_name(caps.get(2)?.as_str())?;
        Some(CustomLinkMatch {
            label: caps.get(1)?.as_str().to_string(),
            target_type,
        })
    }

    /// Resolve the target type of a navigation property
    pub fn navigation_target(&self, nav: &NavigationPropertyMain) -> Option<&Arc<EntityType>> {
        self.entity_type_for_name(nav.target_type())
    }
}
