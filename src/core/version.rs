//! Protocol versions

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Protocol version, the first path segment after the service root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum Version {
    #[serde(rename = "v1.0")]
    V1_0,
    #[default]
    #[serde(rename = "v1.1")]
    V1_1,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "v1.0",
            Version::V1_1 => "v1.1",
        }
    }

    /// Status code and message returned when a path does not resolve
    pub fn not_found(&self) -> (u16, &'static str) {
        match self {
            Version::V1_0 => (404, "Not Found"),
            Version::V1_1 => (404, "Nothing found."),
        }
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "v1.0" => Ok(Version::V1_0),
            "v1.1" => Ok(Version::V1_1),
            other => Err(format!("unsupported version '{other}'")),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
