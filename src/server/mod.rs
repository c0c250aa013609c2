//! Server assembly
//!
//! - [`ServerHost`]: shared, transport-agnostic engine state
//! - [`ServerBuilder`]: settings, plugins and store in, router out
//! - [`RestExposure`]: HTTP mapping onto the request engine

pub mod builder;
pub mod exposure;
pub mod host;

pub use builder::ServerBuilder;
pub use exposure::RestExposure;
pub use host::ServerHost;

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber filtered by `RUST_LOG`, `info` by default
///
/// Does nothing when a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
