//! Deployment environments of the Geocaching API.
//!
//! # Design
//! Each `Environment` maps to a fixed `EnvironmentSettings` record. The client
//! resolves it once at construction and never re-resolves it, so a request
//! always targets the endpoint the client was built for.

use std::fmt;
use std::str::FromStr;

use crate::error::GeocachingError;

/// API version segment prepended to every relative path.
pub const API_VERSION: &str = "v1";

/// Named deployment of the Geocaching API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    Staging,
    #[default]
    Production,
}

/// Where an environment lives on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSettings {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

impl Environment {
    pub fn settings(self) -> EnvironmentSettings {
        match self {
            Environment::Staging => {
                EnvironmentSettings::new("https", "staging.api.groundspeak.com", 443, "/")
            }
            Environment::Production => {
                EnvironmentSettings::new("https", "api.groundspeak.com", 443, "/")
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = GeocachingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(GeocachingError::Config(format!("unknown environment: {other:?}"))),
        }
    }
}

impl EnvironmentSettings {
    pub fn new(scheme: &str, host: &str, port: u16, base_path: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            base_path: base_path.to_string(),
        }
    }

    /// `scheme://host[:port]/base`, without a trailing slash. The port is
    /// omitted when it is the scheme's default.
    pub fn base_url(&self) -> String {
        let default_port = match self.scheme.as_str() {
            "https" => Some(443),
            "http" => Some(80),
            _ => None,
        };
        let authority = if default_port == Some(self.port) {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        };
        let base = self.base_path.trim_matches('/');
        if base.is_empty() {
            format!("{}://{authority}", self.scheme)
        } else {
            format!("{}://{authority}/{base}", self.scheme)
        }
    }

    /// Join a relative API path (with optional query) onto the base URL.
    pub fn url_for(&self, relative: &str) -> String {
        format!("{}/{}", self.base_url(), relative.trim_start_matches('/'))
    }
}
