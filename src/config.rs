//! Proxy configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config. The
//! defaults describe the recommendation front end this cache was built for:
//! backend on `http://127.0.0.1:8000`, images and `/products` `/recommend`
//! calls cached, namespaces named `ai-recommendation-cache-<version>`.
//!
//! ```
//! use shelfcache::config::ProxyConfig;
//!
//! let config = ProxyConfig::from_json(r#"{
//!     "version": "v2",
//!     "origin_timeout_ms": 1500,
//!     "policy": { "api_path_fragments": ["/catalog"] }
//! }"#).unwrap();
//!
//! assert_eq!(config.namespace_prefix, "ai-recommendation-cache");
//! assert_eq!(config.version, "v2");
//! assert_eq!(config.origin_timeout().unwrap().as_millis(), 1500);
//! assert_eq!(config.policy.image_extensions.len(), 6);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::interceptor::OfflineConfig;
use crate::policy::PolicyRules;

/// Environment variable overriding [`ProxyConfig::listen`].
pub const ENV_LISTEN: &str = "SHELFCACHE_LISTEN";
/// Environment variable overriding [`ProxyConfig::origin`].
pub const ENV_ORIGIN: &str = "SHELFCACHE_ORIGIN";
/// Environment variable overriding [`ProxyConfig::version`].
pub const ENV_VERSION: &str = "SHELFCACHE_VERSION";

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Address the host server binds to.
    pub listen: String,
    /// Base URL relative request targets are resolved against.
    pub origin: String,
    /// Namespace names are `{namespace_prefix}-{version}`.
    pub namespace_prefix: String,
    /// Deployment version tag; changing it invalidates the whole cache.
    pub version: String,
    /// Upper bound on one origin call, in milliseconds. Absent means unbounded.
    pub origin_timeout_ms: Option<u64>,
    /// Seconds between retries of a failed namespace swap.
    pub swap_retry_secs: u64,
    pub policy: PolicyRules,
    pub offline: OfflineConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            origin: "http://127.0.0.1:8000".to_owned(),
            namespace_prefix: "ai-recommendation-cache".to_owned(),
            version: "v1".to_owned(),
            origin_timeout_ms: None,
            swap_retry_secs: 30,
            policy: PolicyRules::default(),
            offline: OfflineConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Applies `SHELFCACHE_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, keyed by the `SHELFCACHE_*` names.
    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.listen = listen;
        }
        if let Some(origin) = lookup(ENV_ORIGIN) {
            self.origin = origin;
        }
        if let Some(version) = lookup(ENV_VERSION) {
            self.version = version;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn origin_timeout(&self) -> Option<Duration> {
        self.origin_timeout_ms.map(Duration::from_millis)
    }

    pub fn swap_retry(&self) -> Duration {
        Duration::from_secs(self.swap_retry_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "version",
                reason: "must not be empty".into(),
            });
        }
        if self.namespace_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "namespace_prefix",
                reason: "must not be empty".into(),
            });
        }
        if self.swap_retry_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "swap_retry_secs",
                reason: "must be at least 1".into(),
            });
        }
        if !(100..=999).contains(&self.offline.status) {
            return Err(ConfigError::Invalid {
                field: "offline.status",
                reason: format!("{} is not an HTTP status code", self.offline.status),
            });
        }
        Ok(())
    }
}
