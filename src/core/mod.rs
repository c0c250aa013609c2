//! Core types shared by every layer: errors, protocol versions, caller
//! identity, change events and naming helpers

pub mod auth;
pub mod error;
pub mod events;
pub mod pluralize;
pub mod version;

pub use auth::{AuthContext, AuthPolicy, AuthProvider, NoAuthProvider};
pub use error::{StaError, StaResult};
pub use events::{ChangeEvent, EventBus};
pub use pluralize::Pluralizer;
pub use version::Version;
