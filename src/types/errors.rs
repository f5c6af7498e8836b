//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and carry
//! enough context (cluster, tool, namespace) to be shown to an operator as-is.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the tool lifecycle manager.
#[derive(Error, Debug)]
pub enum Error {
    /// The cluster directory has no entry for this name.
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// No tool detail is registered for the requested (name, version).
    #[error("unknown tool version: {name}@{version}")]
    UnknownToolVersion { name: String, version: String },

    /// Tool record repository failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The cluster API could not be reached or answered with a server error.
    #[error("cluster unreachable: {0}")]
    ClusterUnreachable(String),

    /// A cluster object (namespace, service, ...) or tool does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A cluster object already exists (namespace creation races).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The tool's service declares no reachable node port.
    #[error("can't get nodeport {service}({namespace}) from cluster {cluster}")]
    ServiceNotExposed {
        cluster: String,
        service: String,
        namespace: String,
    },

    /// Install, upgrade or uninstall failed inside the installer.
    #[error("installer failure: {0}")]
    InstallerFailure(String),

    /// Another lifecycle operation is still running for this (cluster, tool).
    #[error("operation already in flight for tool {tool} on cluster {cluster}")]
    ConflictingOperation { cluster: String, tool: String },

    /// Request data failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The installable-tool catalog could not be refreshed after a sync.
    #[error("catalog refresh failed: {0}")]
    CatalogRefresh(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal errors (task panics, poisoned state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a caller-initiated retry can reasonably succeed.
    ///
    /// Precondition failures (unknown cluster, unknown version, bad input)
    /// will fail again until the request or the catalog changes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::ClusterUnreachable(_)
                | Error::ConflictingOperation { .. }
                | Error::CatalogRefresh(_)
        )
    }
}

// Convenience constructors
impl Error {
    pub fn cluster_not_found(cluster: impl Into<String>) -> Self {
        Self::ClusterNotFound(cluster.into())
    }

    pub fn unknown_tool_version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::UnknownToolVersion {
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::ClusterUnreachable(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn installer(msg: impl Into<String>) -> Self {
        Self::InstallerFailure(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_not_exposed_message() {
        let err = Error::ServiceNotExposed {
            cluster: "prod".to_string(),
            service: "kubepi".to_string(),
            namespace: "kube-operator".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "can't get nodeport kubepi(kube-operator) from cluster prod"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::storage("db down").is_transient());
        assert!(Error::unreachable("timeout").is_transient());
        assert!(!Error::cluster_not_found("ghost").is_transient());
        assert!(!Error::unknown_tool_version("loki", "9.9").is_transient());
    }
}
