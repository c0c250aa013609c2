//! Property name resolution
//!
//! Turns a raw path or expression segment into a [`Property`], given the
//! entity type it applies to and the property resolved just before it.
//! Lambda variables of `$filter` / `$expand` sub-expressions live in
//! [`Scope`]s, which form an immutable linked environment.

use crate::core::error::{EntityError, RequestError, StaResult};
use crate::model::{
    EntityPropertyCustom, EntityPropertyCustomLink, EntityType, ModelRegistry, Property,
};
use indexmap::IndexMap;
use std::sync::Arc;

/// A lambda variable bound to an entity type
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub entity_type: Arc<EntityType>,
}

/// One level of lexical bindings with an optional enclosing scope
#[derive(Debug, Default)]
pub struct Scope {
    bindings: IndexMap<String, Binding>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    /// The empty outermost scope
    pub fn root() -> Arc<Scope> {
        Arc::new(Scope::default())
    }

    /// A nested scope declaring `bindings`; a name may appear only once
    pub fn nested(parent: &Arc<Scope>, bindings: Vec<Binding>) -> StaResult<Arc<Scope>> {
        let mut map = IndexMap::with_capacity(bindings.len());
        for binding in bindings {
            if map.contains_key(&binding.name) {
                return Err(RequestError::query(format!(
                    "variable '{}' declared twice in one scope",
                    binding.name
                ))
                .into());
            }
            map.insert(binding.name.clone(), binding);
        }
        Ok(Arc::new(Scope {
            bindings: map,
            parent: Some(parent.clone()),
        }))
    }

    /// Innermost binding for `name`
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.bindings
            .get(name)
            .or_else(|| self.parent.as_deref().and_then(|p| p.lookup(name)))
    }
}

/// Outcome of resolving a name
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Property(Property),
    Variable(Binding),
}

impl Resolved {
    pub fn into_property(self) -> Option<Property> {
        match self {
            Resolved::Property(p) => Some(p),
            Resolved::Variable(_) => None,
        }
    }
}

/// Resolves names against the frozen schema
#[derive(Clone)]
pub struct PropertyResolver {
    registry: Arc<ModelRegistry>,
}

impl PropertyResolver {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Resolve `raw_name` on `entity_type` after `previous`
    pub fn resolve(
        &self,
        entity_type: &EntityType,
        raw_name: &str,
        previous: Option<&Property>,
        scope: &Scope,
    ) -> StaResult<Resolved> {
        let name = urlencoding::decode(raw_name)
            .map_err(|e| RequestError::query(format!("bad encoding in '{raw_name}': {e}")))?
            .into_owned();

        if let Some(binding) = scope.lookup(&name) {
            return Ok(Resolved::Variable(binding.clone()));
        }

        if previous.is_some_and(Property::continues_as_custom) {
            return Ok(Resolved::Property(self.resolve_custom(name)));
        }

        if let Some(nav) = entity_type.navigation_property(&name) {
            return Ok(Resolved::Property(nav.clone().into()));
        }
        if let Some(prop) = entity_type.entity_property(&name) {
            return Ok(Resolved::Property(prop.clone().into()));
        }

        Err(EntityError::NoSuchProperty {
            entity_type: entity_type.name().to_string(),
            name,
            previous: previous
                .map(|p| p.name().to_string())
                .unwrap_or_else(|| "start".to_string()),
        }
        .into())
    }

    /// A step into a free-form payload: a custom link when the name matches
    /// `<label>.<Type>@iot.id`, a plain custom property otherwise
    pub fn resolve_custom(&self, name: String) -> Property {
        match self.registry.match_custom_link(&name) {
            Some(link) => {
                let label = link.label.clone();
                let target = link.target_type.name().to_string();
                Property::CustomLink(EntityPropertyCustomLink::new(name, label, target))
            }
            None => Property::Custom(EntityPropertyCustom::new(name)),
        }
    }
}
