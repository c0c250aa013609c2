//! # sta-rs
//!
//! Request-path resolution and request execution for SensorThings-style
//! entity APIs.
//!
//! ## Features
//!
//! - **Schema Registry**: entity types, properties and navigation relations
//!   contributed by plugins and frozen before serving
//! - **Resource Paths**: URL paths parsed into typed element chains with
//!   parent links, `$ref` and `$value`
//! - **Links and Paging**: self, navigation and next links, with keyset
//!   (`$skipFilter`) continuation when the ordering is total
//! - **Custom Links**: `name.Type@iot.id` keys in free-form properties
//!   rendered as navigation links
//! - **Request Engine**: read, create, update, patch and delete with
//!   per-call or explicit transactions and change events after commit
//! - **Pluggable Storage**: an async persistence interface with a bundled
//!   in-memory store
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sta::prelude::*;
//!
//! let host = Arc::new(ServerBuilder::new().build_host()?);
//! let mut service = Service::new(host);
//!
//! let response = service
//!     .execute(
//!         ServiceRequest::new(RequestType::Create, Version::V1_1, "/Things")
//!             .with_content(r#"{"name": "lamp", "description": "a lamp"}"#),
//!     )
//!     .await;
//! assert_eq!(response.code, 201);
//! ```

pub mod config;
pub mod core;
pub mod links;
pub mod model;
pub mod path;
pub mod persistence;
pub mod plugins;
pub mod query;
pub mod server;
pub mod service;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core ===
    pub use crate::core::{
        auth::{AuthContext, AuthPolicy, AuthProvider, NoAuthProvider},
        error::{StaError, StaResult},
        events::{ChangeEvent, EventBus, EventEnvelope},
        pluralize::Pluralizer,
        version::Version,
    };

    // === Model ===
    pub use crate::model::{Entity, EntityType, ModelRegistry, NavigationValue, PkValue};
    pub use crate::plugins::{ModelPlugin, PluginManager};

    // === Paths and queries ===
    pub use crate::path::{PathElement, PathParser, ResourcePath};
    pub use crate::query::{Expression, Query};

    // === Persistence ===
    pub use crate::persistence::{PersistenceManager, PersistenceManagerFactory, ResultValue};
    pub use crate::storage::InMemoryPersistence;

    // === Engine ===
    pub use crate::service::{RequestType, Service, ServiceRequest, ServiceResponse};

    // === Config ===
    pub use crate::config::CoreSettings;

    // === Server ===
    pub use crate::server::{RestExposure, ServerBuilder, ServerHost, init_tracing};

    // === External dependencies ===
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
}
