//! Server host for transport-agnostic API exposure
//!
//! The host holds everything a request needs that outlives the request:
//! settings, the frozen model registry, the persistence factory, the
//! formatters, the authorizer, and the optional event bus. It is built once
//! at startup, wrapped in an `Arc`, and shared by every exposure.

use crate::config::CoreSettings;
use crate::core::events::EventBus;
use crate::links::CustomLinkExpander;
use crate::model::ModelRegistry;
use crate::path::PathParser;
use crate::persistence::PersistenceManagerFactory;
use crate::service::{FormatterRegistry, PolicyAuthorizer};
use std::sync::Arc;

/// Host context containing all shared engine state
///
/// # Example
///
/// ```rust,ignore
/// let registry = Arc::new(PluginManager::with_defaults().build_registry(&settings)?);
/// let store = Arc::new(InMemoryPersistence::new(registry.clone()));
/// let host = Arc::new(ServerHost::new(settings, registry, store));
///
/// let mut service = Service::new(host.clone());
/// let response = service
///     .execute(ServiceRequest::new(RequestType::Read, Version::V1_1, "/Things"))
///     .await;
/// ```
pub struct ServerHost {
    pub settings: Arc<CoreSettings>,

    /// Frozen schema registry
    pub registry: Arc<ModelRegistry>,

    /// Source of per-request store sessions
    pub persistence: Arc<dyn PersistenceManagerFactory>,

    pub formatters: FormatterRegistry,

    pub authorizer: PolicyAuthorizer,

    pub parser: PathParser,

    pub custom_links: CustomLinkExpander,

    /// Receives change events after each successful commit
    pub event_bus: Option<Arc<EventBus>>,
}

impl ServerHost {
    pub fn new(
        settings: CoreSettings,
        registry: Arc<ModelRegistry>,
        persistence: Arc<dyn PersistenceManagerFactory>,
    ) -> Self {
        let parser = PathParser::new(registry.clone(), settings.service_root());
        let custom_links = CustomLinkExpander::new(registry.clone(), &settings.custom_links);
        let authorizer = PolicyAuthorizer::from_settings(&settings.auth);
        Self {
            settings: Arc::new(settings),
            registry,
            persistence,
            formatters: FormatterRegistry::new(),
            authorizer,
            parser,
            custom_links,
            event_bus: None,
        }
    }

    /// Set the event bus for change notifications
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(Arc::new(event_bus));
        self
    }

    pub fn with_formatters(mut self, formatters: FormatterRegistry) -> Self {
        self.formatters = formatters;
        self
    }

    /// Get a reference to the event bus (if configured)
    pub fn event_bus(&self) -> Option<&Arc<EventBus>> {
        self.event_bus.as_ref()
    }

    /// Plural names of all entity sets, in registration order
    pub fn entity_sets(&self) -> Vec<&str> {
        self.registry
            .entity_types()
            .iter()
            .map(|t| t.plural())
            .collect()
    }
}
