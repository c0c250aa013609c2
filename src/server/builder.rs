//! ServerBuilder for fluent API to build HTTP servers

use super::exposure::RestExposure;
use super::host::ServerHost;
use crate::config::CoreSettings;
use crate::core::auth::{AuthProvider, NoAuthProvider};
use crate::core::error::StaResult;
use crate::core::events::EventBus;
use crate::persistence::PersistenceManagerFactory;
use crate::plugins::{PluginFactory, PluginManager};
use crate::service::FormatterRegistry;
use crate::storage::InMemoryPersistence;
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Builder for the host and its REST router
///
/// # Example
///
/// ```ignore
/// let settings = CoreSettings::from_yaml_file("sta.yaml")?;
/// ServerBuilder::new()
///     .with_settings(settings)
///     .with_event_bus(1024)
///     .serve("127.0.0.1:8080")
///     .await?;
/// ```
pub struct ServerBuilder {
    settings: CoreSettings,
    plugins: PluginManager,
    persistence: Option<Arc<dyn PersistenceManagerFactory>>,
    auth_provider: Arc<dyn AuthProvider>,
    formatters: FormatterRegistry,
    custom_routes: Vec<Router>,
    event_bus: Option<EventBus>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            settings: CoreSettings::default(),
            plugins: PluginManager::with_defaults(),
            persistence: None,
            auth_provider: Arc::new(NoAuthProvider),
            formatters: FormatterRegistry::new(),
            custom_routes: Vec::new(),
            event_bus: None,
        }
    }

    pub fn with_settings(mut self, settings: CoreSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Make a plugin available; it still has to be enabled in the settings
    pub fn register_plugin(mut self, name: impl Into<String>, factory: PluginFactory) -> Self {
        self.plugins.register_factory(name, factory);
        self
    }

    /// Set the store; the in-memory store is used when none is given
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceManagerFactory>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_auth_provider(mut self, provider: impl AuthProvider + 'static) -> Self {
        self.auth_provider = Arc::new(provider);
        self
    }

    pub fn with_formatters(mut self, formatters: FormatterRegistry) -> Self {
        self.formatters = formatters;
        self
    }

    /// Add routes that live next to the versioned API
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Enable change notifications
    ///
    /// * `capacity` - Buffer size for the broadcast channel (recommended: 1024)
    pub fn with_event_bus(mut self, capacity: usize) -> Self {
        self.event_bus = Some(EventBus::new(capacity));
        self
    }

    /// Build the transport-agnostic host
    ///
    /// Runs plugin registration and freezes the schema registry.
    pub fn build_host(mut self) -> StaResult<ServerHost> {
        let registry = Arc::new(self.plugins.build_registry(&self.settings)?);
        tracing::info!(
            entity_types = registry.entity_types().len(),
            "schema registry frozen"
        );
        let persistence = match self.persistence.take() {
            Some(persistence) => persistence,
            None => {
                tracing::info!("no store configured, using the in-memory store");
                Arc::new(InMemoryPersistence::new(registry.clone()))
            }
        };

        let mut host = ServerHost::new(self.settings, registry, persistence)
            .with_formatters(self.formatters);
        if let Some(event_bus) = self.event_bus.take() {
            host = host.with_event_bus(event_bus);
        }
        Ok(host)
    }

    /// Build the host and expose it over REST
    pub fn build(mut self) -> StaResult<Router> {
        let custom_routes = std::mem::take(&mut self.custom_routes);
        let auth_provider = self.auth_provider.clone();
        let host = Arc::new(self.build_host()?);
        let mut app = RestExposure::build_router(host, auth_provider);
        for routes in custom_routes {
            app = app.merge(routes);
        }
        Ok(app)
    }

    /// Serve the application with graceful shutdown
    ///
    /// Handles SIGTERM and SIGINT (Ctrl+C).
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, initiating graceful shutdown...");
        },
    }
}
