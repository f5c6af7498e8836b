//! Tool detail catalog: installable (name, version) metadata.
//!
//! Owns install *metadata* only (chart version, default values). The chart
//! rendering itself belongs to the installer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::types::{Error, Result, ToolName};

// =============================================================================
// Tool detail
// =============================================================================

/// How to install or upgrade one version of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDetail {
    pub name: String,
    pub version: String,
    pub chart_version: String,
    /// Architecture family this chart is built for (`amd64`, `arm64`, `all`).
    pub architecture: String,
    #[serde(default)]
    pub description: String,
    /// Default chart values merged under the request's settings.
    #[serde(default)]
    pub values: Value,
}

impl ToolDetail {
    pub fn new(name: &str, version: &str, chart_version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            chart_version: chart_version.to_string(),
            architecture: "all".to_string(),
            description: String::new(),
            values: Value::Null,
        }
    }
}

// =============================================================================
// Catalog contract
// =============================================================================

/// Source of [`ToolDetail`]s, refreshed from the chart repository.
#[async_trait]
pub trait ToolDetailCatalog: Send + Sync {
    /// Look up the detail for (name, version).
    ///
    /// Fails with [`Error::UnknownToolVersion`] when none is registered.
    async fn get(&self, name: &ToolName, version: &str) -> Result<ToolDetail>;

    /// Re-sync installable charts for an architecture family.
    async fn refresh(&self, architecture: &str) -> Result<()>;
}

// =============================================================================
// In-memory catalog
// =============================================================================

/// In-memory tool catalog keyed by name, then version.
#[derive(Debug, Default)]
pub struct InMemoryToolCatalog {
    entries: RwLock<HashMap<String, BTreeMap<String, ToolDetail>>>,
    refreshed: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from details, rejecting invalid entries.
    pub fn with_details(details: impl IntoIterator<Item = ToolDetail>) -> Result<Self> {
        let catalog = Self::new();
        for detail in details {
            catalog.register(detail)?;
        }
        Ok(catalog)
    }

    /// Register a tool detail. Re-registering a (name, version) replaces it.
    pub fn register(&self, detail: ToolDetail) -> Result<()> {
        if detail.name.is_empty() {
            return Err(Error::validation("Tool name cannot be empty"));
        }
        if detail.version.is_empty() {
            return Err(Error::validation(format!(
                "Tool {} needs a version",
                detail.name
            )));
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::internal("tool catalog lock poisoned"))?;
        entries
            .entry(detail.name.clone())
            .or_default()
            .insert(detail.version.clone(), detail);
        Ok(())
    }

    /// List registered versions of a tool, sorted.
    pub fn versions(&self, name: &str) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .get(name)
                    .map(|versions| versions.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// When the catalog was last refreshed for an architecture family.
    pub fn last_refreshed(&self, architecture: &str) -> Option<DateTime<Utc>> {
        self.refreshed
            .read()
            .ok()
            .and_then(|r| r.get(architecture).copied())
    }

    /// Number of registered (name, version) pairs.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .map(|entries| entries.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ToolDetailCatalog for InMemoryToolCatalog {
    async fn get(&self, name: &ToolName, version: &str) -> Result<ToolDetail> {
        let entries = self
            .entries
            .read()
            .map_err(|_| Error::internal("tool catalog lock poisoned"))?;
        entries
            .get(name.as_str())
            .and_then(|versions| versions.get(version))
            .cloned()
            .ok_or_else(|| Error::unknown_tool_version(name.as_str(), version))
    }

    async fn refresh(&self, architecture: &str) -> Result<()> {
        let mut refreshed = self
            .refreshed
            .write()
            .map_err(|_| Error::internal("tool catalog lock poisoned"))?;
        refreshed.insert(architecture.to_string(), Utc::now());
        tracing::debug!("tool_catalog_refreshed: architecture={}", architecture);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
