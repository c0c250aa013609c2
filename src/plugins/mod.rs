//! Model plugins
//!
//! Plugins contribute entity types and relations to the schema registry
//! before it is frozen. They are looked up by name in an explicit factory
//! table; the enabled set comes from [`CoreSettings::plugins`].
//!
//! A plugin that extends types owned by another plugin reports
//! [`PluginInit::NotReady`] until those types exist. The manager keeps
//! retrying pending plugins until all are registered, no pass makes
//! progress, or the configured pass limit is reached.

pub mod actuation;
pub mod core_model;

use crate::config::CoreSettings;
use crate::core::error::ModelError;
use crate::model::{ModelRegistry, ModelRegistryBuilder};
use indexmap::IndexMap;

/// Outcome of one registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginInit {
    /// All types and relations are registered
    Done,
    /// A dependency is missing; nothing was registered
    NotReady { missing: String },
}

/// A contributor to the schema registry
pub trait ModelPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Register types and relations
    ///
    /// Must not touch `builder` when returning [`PluginInit::NotReady`].
    fn register(&self, builder: &mut ModelRegistryBuilder) -> Result<PluginInit, ModelError>;
}

/// Constructor stored in the plugin table
pub type PluginFactory = fn(&CoreSettings) -> Box<dyn ModelPlugin>;

/// Name-to-factory table and registration driver
pub struct PluginManager {
    factories: IndexMap<String, PluginFactory>,
}

impl PluginManager {
    /// An empty table
    pub fn new() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// The table with the bundled plugins
    pub fn with_defaults() -> Self {
        let mut manager = Self::new();
        manager.register_factory(core_model::PLUGIN_NAME, |_| {
            Box::new(core_model::CoreModelPlugin)
        });
        manager.register_factory(actuation::PLUGIN_NAME, |_| {
            Box::new(actuation::ActuationPlugin)
        });
        manager
    }

    pub fn register_factory(&mut self, name: impl Into<String>, factory: PluginFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiate the enabled plugins and freeze the resulting registry
    pub fn build_registry(&self, settings: &CoreSettings) -> Result<ModelRegistry, ModelError> {
        let mut pending = Vec::with_capacity(settings.plugins.len());
        for name in &settings.plugins {
            let factory = self
                .factories
                .get(name)
                .ok_or_else(|| ModelError::UnknownPlugin { name: name.clone() })?;
            pending.push(factory(settings));
        }

        let mut builder = ModelRegistryBuilder::new();
        let max_passes = settings.plugin_max_passes.max(1);
        let mut passes = 0;
        while !pending.is_empty() {
            if passes == max_passes {
                return Err(not_converged(passes, &pending));
            }
            passes += 1;

            let before = pending.len();
            let mut still_pending = Vec::new();
            for plugin in pending {
                match plugin.register(&mut builder)? {
                    PluginInit::Done => {
                        tracing::info!(plugin = plugin.name(), pass = passes, "plugin registered");
                    }
                    PluginInit::NotReady { missing } => {
                        tracing::debug!(plugin = plugin.name(), %missing, "plugin deferred");
                        still_pending.push(plugin);
                    }
                }
            }
            pending = still_pending;
            if pending.len() == before {
                return Err(not_converged(passes, &pending));
            }
        }

        builder.build()
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn not_converged(passes: usize, pending: &[Box<dyn ModelPlugin>]) -> ModelError {
    ModelError::PluginsDidNotConverge {
        passes,
        pending: pending.iter().map(|p| p.name().to_string()).collect(),
    }
}

/// Report the first of `names` that is not registered yet
pub(crate) fn require_types(builder: &ModelRegistryBuilder, names: &[&str]) -> Option<PluginInit> {
    names
        .iter()
        .find(|n| !builder.has_entity_type(n))
        .map(|n| PluginInit::NotReady {
            missing: n.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityTypeBuilder;

    fn settings_with(plugins: &[&str]) -> CoreSettings {
        CoreSettings {
            plugins: plugins.iter().map(|s| s.to_string()).collect(),
            ..CoreSettings::default()
        }
    }

    #[test]
    fn test_dependent_plugin_registered_on_second_pass() {
        let manager = PluginManager::with_defaults();
        // actuation first: it needs Thing from core
        let registry = manager
            .build_registry(&settings_with(&["actuation", "core"]))
            .unwrap();
        let thing = registry.entity_type_for_name("Thing").unwrap();
        assert!(thing.navigation_property("TaskingCapabilities").is_some());
        assert!(registry.entity_type_for_name("Task").is_some());
    }

    #[test]
    fn test_missing_dependency_fails() {
        let manager = PluginManager::with_defaults();
        let err = manager
            .build_registry(&settings_with(&["actuation"]))
            .unwrap_err();
        match err {
            ModelError::PluginsDidNotConverge { pending, .. } => {
                assert_eq!(pending, vec!["actuation".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_plugin() {
        let manager = PluginManager::with_defaults();
        let err = manager
            .build_registry(&settings_with(&["core", "tasking"]))
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownPlugin { .. }));
    }

    struct Chain(&'static str, Option<&'static str>);

    impl ModelPlugin for Chain {
        fn name(&self) -> &str {
            self.0
        }

        fn register(
            &self,
            builder: &mut ModelRegistryBuilder,
        ) -> Result<PluginInit, ModelError> {
            if let Some(not_ready) = self.1.and_then(|dep| require_types(builder, &[dep])) {
                return Ok(not_ready);
            }
            builder.register_entity_type(EntityTypeBuilder::new(self.0))?;
            Ok(PluginInit::Done)
        }
    }

    #[test]
    fn test_pass_limit_enforced() {
        let mut manager = PluginManager::new();
        manager.register_factory("Alpha", |_| Box::new(Chain("Alpha", None)));
        manager.register_factory("Beta", |_| Box::new(Chain("Beta", Some("Alpha"))));
        manager.register_factory("Gamma", |_| Box::new(Chain("Gamma", Some("Beta"))));

        // Gamma, Beta, Alpha needs three passes
        let mut settings = settings_with(&["Gamma", "Beta", "Alpha"]);
        assert!(manager.build_registry(&settings).is_ok());

        settings.plugin_max_passes = 2;
        let err = manager.build_registry(&settings).unwrap_err();
        assert!(matches!(
            err,
            ModelError::PluginsDidNotConverge { passes: 2, .. }
        ));
    }
}
