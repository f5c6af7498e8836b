//! Tool records: ToolStatus, ToolVars, ToolRecord and its storage projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::types::{ClusterName, Result, ToolName};

/// Tool lifecycle status.
///
/// State transitions:
/// ```text
/// WAITING → INITIALIZING → RUNNING
/// RUNNING → UPGRADING → RUNNING
/// {RUNNING | WAITING} → TERMINATING → WAITING
/// any → FAILED   (not terminal: Enable/Upgrade retry)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ToolStatus {
    Waiting,
    Initializing,
    Running,
    Upgrading,
    Terminating,
    Failed,
}

impl ToolStatus {
    /// A background operation is expected to move the tool out of this status.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            ToolStatus::Initializing | ToolStatus::Upgrading | ToolStatus::Terminating
        )
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: ToolStatus) -> bool {
        match (self, to) {
            (_, ToolStatus::Failed) => true,
            // Reconciliation may observe any phase
            (_, ToolStatus::Waiting) | (_, ToolStatus::Running) => true,
            (ToolStatus::Waiting | ToolStatus::Failed, ToolStatus::Initializing) => true,
            (ToolStatus::Running | ToolStatus::Failed, ToolStatus::Upgrading) => true,
            (
                ToolStatus::Running | ToolStatus::Waiting | ToolStatus::Failed,
                ToolStatus::Terminating,
            ) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolStatus::Waiting => "Waiting",
            ToolStatus::Initializing => "Initializing",
            ToolStatus::Running => "Running",
            ToolStatus::Upgrading => "Upgrading",
            ToolStatus::Terminating => "Terminating",
            ToolStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-tool variables.
///
/// `namespace` is the authoritative location of the tool's workload. Every
/// other key is a tool-specific setting; the descriptor of a tool may carry a
/// JSON Schema for them. Serialized flat:
/// `{"namespace": "monitoring", "retention": "7d"}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolVars {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl ToolVars {
    pub fn in_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            settings: Map::new(),
        }
    }

    /// Namespace recorded in the vars, or `default` when absent or blank.
    pub fn namespace_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.trim().is_empty() => ns,
            _ => default,
        }
    }

    /// Encode to the opaque document kept by the store.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the stored document. Empty documents decode to empty vars.
    pub fn decode(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }
}

/// A tool installed (or once installed) on a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub cluster: ClusterName,
    pub name: ToolName,
    pub version: String,
    /// Version offered for upgrade, cleared once an upgrade is started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub higher_version: Option<String>,
    pub status: ToolStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub vars: ToolVars,
    pub updated_at: DateTime<Utc>,
}

impl ToolRecord {
    pub fn new(cluster: ClusterName, name: ToolName, version: impl Into<String>) -> Self {
        Self {
            cluster,
            name,
            version: version.into(),
            higher_version: None,
            status: ToolStatus::Waiting,
            message: String::new(),
            vars: ToolVars::default(),
            updated_at: Utc::now(),
        }
    }

    /// Move to `status`, clearing any previous failure message.
    pub fn transition(&mut self, status: ToolStatus) {
        if !self.status.can_transition_to(status) {
            tracing::debug!(
                "unusual_tool_transition: cluster={}, tool={}, from={}, to={}",
                self.cluster,
                self.name,
                self.status,
                status
            );
        }
        self.status = status;
        self.message.clear();
        self.updated_at = Utc::now();
    }

    /// Move to `Failed` with a human-readable reason.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ToolStatus::Failed;
        self.message = message.into();
        self.updated_at = Utc::now();
    }

    /// Storage projection with the vars encoded as a JSON document.
    pub fn to_stored(&self) -> Result<StoredToolRecord> {
        Ok(StoredToolRecord {
            cluster: self.cluster.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            higher_version: self.higher_version.clone(),
            status: self.status,
            message: self.message.clone(),
            vars: self.vars.encode()?,
            updated_at: self.updated_at,
        })
    }
}

/// Row shape persisted by a [`ToolRecordStore`](crate::store::ToolRecordStore).
///
/// The store treats `vars` as an opaque document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToolRecord {
    pub cluster: ClusterName,
    pub name: ToolName,
    pub version: String,
    pub higher_version: Option<String>,
    pub status: ToolStatus,
    pub message: String,
    pub vars: String,
    pub updated_at: DateTime<Utc>,
}

impl StoredToolRecord {
    /// Decode into a [`ToolRecord`].
    ///
    /// A malformed vars document is logged and replaced by empty vars so one
    /// bad row never hides the rest of a cluster's tools.
    pub fn decode(self) -> ToolRecord {
        let vars = ToolVars::decode(&self.vars).unwrap_or_else(|e| {
            tracing::warn!(
                "tool_vars_decode_failed: cluster={}, tool={}, error={}",
                self.cluster,
                self.name,
                e
            );
            ToolVars::default()
        });
        ToolRecord {
            cluster: self.cluster,
            name: self.name,
            version: self.version,
            higher_version: self.higher_version,
            status: self.status,
            message: self.message,
            vars,
            updated_at: self.updated_at,
        }
    }
}

/// Caller input for Enable, Upgrade and Disable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub name: ToolName,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub higher_version: Option<String>,
    #[serde(default)]
    pub vars: ToolVars,
}

impl ToolRequest {
    pub fn new(name: ToolName, version: impl Into<String>) -> Self {
        Self {
            name,
            version: version.into(),
            higher_version: None,
            vars: ToolVars::default(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.vars.namespace = Some(namespace.into());
        self
    }

    pub fn with_higher_version(mut self, version: impl Into<String>) -> Self {
        self.higher_version = Some(version.into());
        self
    }
}
