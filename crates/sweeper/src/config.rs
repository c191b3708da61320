//! Sweeper configuration
//!
//! Configuration is read from an optional YAML file, overridden by CLI flags
//! and environment variables, then validated into [`Settings`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ttl::{TtlError, TtlPolicy, DEFAULT_TTL};

/// Label selector that marks objects as subject to cleanup
pub const DEFAULT_LABEL_SELECTOR: &str = "mark=cleanup";

/// Ceiling for a single list or delete call
pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("invalid default TTL: {0}")]
    DefaultTtl(#[from] TtlError),

    #[error("target namespace must not be empty")]
    MissingNamespace,

    #[error("label selector must not be empty")]
    EmptyLabelSelector,

    #[error("request timeout must be greater than zero")]
    ZeroTimeout,
}

/// File-level sweeper configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweeperConfig {
    /// TTL used when an object carries no `ttl` label
    #[serde(default = "default_ttl")]
    pub default_ttl: String,

    /// Selector applied when listing label-filtered kinds
    #[serde(default = "default_label_selector")]
    pub label_selector: String,

    /// OTLP endpoint for metrics; flushing is skipped when unset
    #[serde(default)]
    pub metrics_endpoint: Option<String>,

    /// Timeout for each list or delete call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Log what would be deleted without deleting
    #[serde(default)]
    pub dry_run: bool,
}

fn default_ttl() -> String {
    DEFAULT_TTL.to_string()
}

fn default_label_selector() -> String {
    DEFAULT_LABEL_SELECTOR.to_string()
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_ttl(),
            label_selector: default_label_selector(),
            metrics_endpoint: None,
            request_timeout_seconds: default_request_timeout(),
            dry_run: false,
        }
    }
}

/// Validated settings for one pass
#[derive(Debug, Clone)]
pub struct Settings {
    pub namespace: String,
    pub ttl_policy: TtlPolicy,
    pub label_selector: String,
    pub metrics_endpoint: Option<String>,
    pub request_timeout: Duration,
    pub dry_run: bool,
}

impl SweeperConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Resolve into [`Settings`] for `namespace`. The default TTL is parsed
    /// here, so an invalid value fails startup.
    pub fn validate(&self, namespace: &str) -> Result<Settings, ConfigError> {
        let namespace = namespace.trim();
        if namespace.is_empty() {
            return Err(ConfigError::MissingNamespace);
        }
        if self.label_selector.trim().is_empty() {
            return Err(ConfigError::EmptyLabelSelector);
        }
        if self.request_timeout_seconds == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        let ttl_policy = TtlPolicy::from_default(&self.default_ttl)?;

        Ok(Settings {
            namespace: namespace.to_string(),
            ttl_policy,
            label_selector: self.label_selector.trim().to_string(),
            metrics_endpoint: self
                .metrics_endpoint
                .as_deref()
                .map(str::trim)
                .filter(|endpoint| !endpoint.is_empty())
                .map(str::to_string),
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            dry_run: self.dry_run,
        })
    }
}
