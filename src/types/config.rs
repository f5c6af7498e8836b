//! Configuration structures.
//!
//! Configuration is loaded from a JSON file (or string) and then overridden
//! from `CLUSTER_TOOLS_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

/// Namespace tools are installed into when a request does not name one.
pub const DEFAULT_NAMESPACE: &str = "kube-operator";

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Lifecycle manager configuration.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Periodic status sync configuration.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse configuration from a JSON document. Missing sections use defaults.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::validation(format!("cannot read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Apply `CLUSTER_TOOLS_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ns) = lookup("CLUSTER_TOOLS_DEFAULT_NAMESPACE") {
            if ns.trim().is_empty() {
                return Err(Error::validation(
                    "CLUSTER_TOOLS_DEFAULT_NAMESPACE cannot be empty",
                ));
            }
            self.lifecycle.default_namespace = ns;
        }
        if let Some(raw) = lookup("CLUSTER_TOOLS_MAX_BACKGROUND_TASKS") {
            self.lifecycle.max_background_tasks = raw.parse().map_err(|_| {
                Error::validation(format!(
                    "CLUSTER_TOOLS_MAX_BACKGROUND_TASKS must be a positive integer, got {}",
                    raw
                ))
            })?;
        }
        if let Some(raw) = lookup("CLUSTER_TOOLS_SYNC_INTERVAL_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                Error::validation(format!(
                    "CLUSTER_TOOLS_SYNC_INTERVAL_SECS must be an integer, got {}",
                    raw
                ))
            })?;
            self.sync.interval = Duration::from_secs(secs);
        }
        if let Some(level) = lookup("CLUSTER_TOOLS_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        self.validate()
    }

    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.lifecycle.max_background_tasks == 0 {
            return Err(Error::validation("max_background_tasks must be at least 1"));
        }
        if self.sync.interval.is_zero() {
            return Err(Error::validation("sync interval must be non-zero"));
        }
        Ok(())
    }
}

/// Lifecycle manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Namespace used when a request's vars carry none.
    pub default_namespace: String,

    /// Upper bound on concurrently executing install/upgrade/uninstall tasks.
    /// Tasks beyond the bound wait for a slot; their status is already recorded.
    pub max_background_tasks: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            max_background_tasks: 16,
        }
    }
}

/// Periodic status sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How often to reconcile tool status (default: 30 seconds).
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Clusters reconciled on every tick.
    pub clusters: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            clusters: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}
