//! Configuration loading and management

use crate::core::error::{ConfigError, StaResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for custom link handling inside free-form properties
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CustomLinkSettings {
    /// Expand and clean `<label>.<Type>@iot.id` keys
    pub enabled: bool,

    /// How many levels of nested maps below the top level are searched
    pub recurse_depth: usize,
}

/// Authorization policy names per operation kind
///
/// Values are parsed by [`AuthPolicy::parse_policy`](crate::core::auth::AuthPolicy::parse_policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub read: String,
    pub create: String,
    pub update: String,
    pub delete: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            read: "public".to_string(),
            create: "public".to_string(),
            update: "public".to_string(),
            delete: "public".to_string(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    /// Absolute URL the service is reachable at, without version
    pub service_root_url: String,

    /// Page size when the request has no `$top`
    pub default_top: usize,

    /// Upper bound for `$top`
    pub max_top: usize,

    /// Render navigation links as absolute URLs
    pub use_absolute_navigation_links: bool,

    /// Allow `DELETE` on filtered entity sets
    pub filter_delete_enabled: bool,

    pub custom_links: CustomLinkSettings,

    /// Enabled model plugins, by name
    pub plugins: Vec<String>,

    /// Maximum number of plugin registration passes
    pub plugin_max_passes: usize,

    pub auth: AuthSettings,

    /// Answer CORS preflights with a permissive policy
    pub cors_enabled: bool,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            service_root_url: "http://localhost:8080".to_string(),
            default_top: 100,
            max_top: 1000,
            use_absolute_navigation_links: true,
            filter_delete_enabled: false,
            custom_links: CustomLinkSettings::default(),
            plugins: vec!["core".to_string()],
            plugin_max_passes: 10,
            auth: AuthSettings::default(),
            cors_enabled: false,
        }
    }
}

impl CoreSettings {
    /// Load settings from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> StaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                file: Some(path.display().to_string()),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Load settings from a YAML string
    pub fn from_yaml_str(yaml: &str) -> StaResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Service root without a trailing slash
    pub fn service_root(&self) -> &str {
        self.service_root_url.trim_end_matches('/')
    }
}
