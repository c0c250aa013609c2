//! Typed error handling for the request engine
//!
//! Every failure that can surface from path parsing, query parsing, entity
//! validation or the persistence layer is expressed as a [`StaError`]. The
//! engine maps it to a response status exactly once, in
//! [`crate::service::Service`].
//!
//! # Error Categories
//!
//! - [`RequestError`]: malformed paths and queries, auth decisions, illegal
//!   request shapes
//! - [`EntityError`]: missing resources, incomplete entities, dangling references
//! - [`StorageError`]: persistence failures, including the fatal
//!   "multiple rows changed" state
//! - [`ModelError`]: schema registry and plugin registration problems
//! - [`ConfigError`]: configuration loading
//!
//! # Example
//!
//! ```rust,ignore
//! match service.execute(request).await {
//!     resp if resp.is_success() => { /* ... */ }
//!     resp => eprintln!("{} {}", resp.code, resp.message),
//! }
//! ```

use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// The main error type of the engine
#[derive(Debug, Error)]
pub enum StaError {
    /// Malformed or disallowed requests
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Entity-level failures
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Persistence failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Schema registry / plugin failures
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Configuration failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unclassified failures; never shown to clients verbatim
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl StaError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            StaError::Request(e) => e.status_code(),
            StaError::Entity(e) => e.status_code(),
            StaError::Storage(e) => e.status_code(),
            StaError::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StaError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            StaError::Request(e) => e.error_code(),
            StaError::Entity(e) => e.error_code(),
            StaError::Storage(e) => e.error_code(),
            StaError::Model(_) => "MODEL_ERROR",
            StaError::Config(_) => "CONFIG_ERROR",
            StaError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True for states that indicate broken store invariants
    pub fn is_fatal(&self) -> bool {
        matches!(self, StaError::Storage(StorageError::MultipleRowsChanged { .. }))
    }

    /// Message safe to hand to a client
    ///
    /// Server-side failures collapse to a generic text so internal details
    /// never leak.
    pub fn client_message(&self) -> String {
        if self.status_code().is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.error_code().to_string(),
            message: self.client_message(),
        }
    }
}

// =============================================================================
// Request Errors
// =============================================================================

/// Errors caused by the shape of the incoming request
#[derive(Debug, Error)]
pub enum RequestError {
    /// Path text could not be turned into a resource path
    #[error("Not a valid path: {message}")]
    InvalidPath { path: String, message: String },

    /// Query text could not be parsed or validated
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// Request body could not be read into an entity or patch
    #[error("Invalid request body: {message}")]
    InvalidBody { message: String },

    /// No or invalid credentials
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Authenticated but not permitted
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// The request is well formed but not allowed on this target
    #[error("{message}")]
    NotAllowed { message: String },

    /// Requested output format is not registered
    #[error("Unknown format: {format}")]
    UnknownFormat { format: String },
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RequestError::InvalidPath { .. } => StatusCode::NOT_FOUND,
            RequestError::InvalidQuery { .. } => StatusCode::BAD_REQUEST,
            RequestError::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            RequestError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            RequestError::Forbidden { .. } => StatusCode::FORBIDDEN,
            RequestError::NotAllowed { .. } => StatusCode::BAD_REQUEST,
            RequestError::UnknownFormat { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            RequestError::InvalidPath { .. } => "INVALID_PATH",
            RequestError::InvalidQuery { .. } => "INVALID_QUERY",
            RequestError::InvalidBody { .. } => "INVALID_BODY",
            RequestError::Unauthorized { .. } => "UNAUTHORIZED",
            RequestError::Forbidden { .. } => "FORBIDDEN",
            RequestError::NotAllowed { .. } => "NOT_ALLOWED",
            RequestError::UnknownFormat { .. } => "UNKNOWN_FORMAT",
        }
    }

    pub(crate) fn query(message: impl Into<String>) -> Self {
        RequestError::InvalidQuery {
            message: message.into(),
        }
    }

    pub(crate) fn not_allowed(message: impl Into<String>) -> Self {
        RequestError::NotAllowed {
            message: message.into(),
        }
    }

    pub(crate) fn body(message: impl Into<String>) -> Self {
        RequestError::InvalidBody {
            message: message.into(),
        }
    }
}

// =============================================================================
// Entity Errors
// =============================================================================

/// Errors related to entities and their relations
#[derive(Debug, Error)]
pub enum EntityError {
    /// The addressed resource does not exist
    #[error("Nothing found at {path}")]
    NotFound { path: String },

    /// A required property or navigation property is missing
    #[error("Incomplete entity: {entity_type} is missing {field}")]
    Incomplete { entity_type: String, field: String },

    /// A referenced related entity does not exist
    #[error("No such entity '{entity_type}' with id {id}")]
    NoSuchEntity { entity_type: String, id: String },

    /// Property name is not known for the type
    #[error("No property '{name}' on {entity_type} (after {previous})")]
    NoSuchProperty {
        entity_type: String,
        name: String,
        previous: String,
    },

    /// Entity content contradicts itself or the request path
    #[error("{message}")]
    IllegalArgument { message: String },
}

impl EntityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EntityError::NotFound { .. } => StatusCode::NOT_FOUND,
            EntityError::Incomplete { .. } => StatusCode::BAD_REQUEST,
            EntityError::NoSuchEntity { .. } => StatusCode::BAD_REQUEST,
            EntityError::NoSuchProperty { .. } => StatusCode::BAD_REQUEST,
            EntityError::IllegalArgument { .. } => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            EntityError::NotFound { .. } => "NOT_FOUND",
            EntityError::Incomplete { .. } => "INCOMPLETE_ENTITY",
            EntityError::NoSuchEntity { .. } => "NO_SUCH_ENTITY",
            EntityError::NoSuchProperty { .. } => "NO_SUCH_PROPERTY",
            EntityError::IllegalArgument { .. } => "ILLEGAL_ARGUMENT",
        }
    }

    pub(crate) fn illegal(message: impl Into<String>) -> Self {
        EntityError::IllegalArgument {
            message: message.into(),
        }
    }
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors raised by persistence managers
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store does not support this request shape
    #[error("Unsupported by store: {message}")]
    Unsupported { message: String },

    /// A single-entity update touched more than one row
    #[error("Update of {entity_type}({id}) changed {count} rows")]
    MultipleRowsChanged {
        entity_type: String,
        id: String,
        count: usize,
    },

    /// Commit / rollback / savepoint failure
    #[error("Transaction error: {message}")]
    Transaction { message: String },

    /// Any other backend failure
    #[error("{backend} error: {message}")]
    Backend { backend: String, message: String },
}

impl StorageError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            StorageError::Unsupported { .. } => "UNSUPPORTED",
            StorageError::MultipleRowsChanged { .. } => "MULTIPLE_ROWS_CHANGED",
            StorageError::Transaction { .. } => "TRANSACTION_ERROR",
            StorageError::Backend { .. } => "STORAGE_ERROR",
        }
    }
}

// =============================================================================
// Model Errors
// =============================================================================

/// Errors raised while building the schema registry
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Entity type '{name}' registered twice")]
    DuplicateEntityType { name: String },

    #[error("Entity type '{name}' is not registered")]
    UnknownEntityType { name: String },

    #[error("Property '{property}' registered twice on {entity_type}")]
    DuplicateProperty {
        entity_type: String,
        property: String,
    },

    #[error("No plugin named '{name}'")]
    UnknownPlugin { name: String },

    #[error("Plugins did not initialise after {passes} passes: {pending:?}")]
    PluginsDidNotConverge { passes: usize, pending: Vec<String> },

    #[error("Invalid custom link pattern: {message}")]
    Pattern { message: String },
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config{}: {message}", file_suffix(.file))]
    ParseError {
        file: Option<String>,
        message: String,
    },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("IO error: {message}")]
    IoError { message: String },
}

fn file_suffix(file: &Option<String>) -> String {
    file.as_deref()
        .map(|f| format!(" file '{f}'"))
        .unwrap_or_default()
}

// =============================================================================
// Conversions from external errors
// =============================================================================

impl From<serde_json::Error> for StaError {
    fn from(err: serde_json::Error) -> Self {
        StaError::Request(RequestError::InvalidBody {
            message: err.to_string(),
        })
    }
}

impl From<serde_yaml::Error> for StaError {
    fn from(err: serde_yaml::Error) -> Self {
        StaError::Config(ConfigError::ParseError {
            file: None,
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for StaError {
    fn from(err: std::io::Error) -> Self {
        StaError::Config(ConfigError::IoError {
            message: err.to_string(),
        })
    }
}

impl From<anyhow::Error> for StaError {
    fn from(err: anyhow::Error) -> Self {
        StaError::Internal(err.to_string())
    }
}

/// A specialized Result type for engine operations
pub type StaResult<T> = Result<T, StaError>;
