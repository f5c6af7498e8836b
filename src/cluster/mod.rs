//! Live cluster access: directory, connection and the read-mostly client.
//!
//! The control-plane client is consumed, not implemented here: callers plug
//! in a [`ClusterConnector`] that knows how to authenticate against the API
//! endpoints a [`ClusterDirectory`] resolves.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::types::{ClusterName, Result};

pub mod memory;
pub mod probe;

pub use memory::{InMemoryCluster, StaticClusterDirectory, StaticConnector};
pub use probe::{ClusterProbe, WorkloadSnapshot};

// =============================================================================
// Directory
// =============================================================================

/// Connection parameters for one cluster.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEndpoint {
    pub name: ClusterName,
    /// API server addresses as `host:port`.
    pub hosts: Vec<String>,
    /// Bearer token for the API server.
    pub token: String,
    /// Architecture family of the cluster nodes, used to refresh the catalog.
    pub architecture: String,
}

impl fmt::Debug for ClusterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterEndpoint")
            .field("name", &self.name)
            .field("hosts", &self.hosts)
            .field("token", &"<redacted>")
            .field("architecture", &self.architecture)
            .finish()
    }
}

/// Resolves cluster names to connection parameters.
#[async_trait]
pub trait ClusterDirectory: Send + Sync {
    /// Fails with [`Error::ClusterNotFound`](crate::Error::ClusterNotFound).
    async fn resolve(&self, cluster: &ClusterName) -> Result<ClusterEndpoint>;
}

/// Opens a client against a resolved cluster.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Fails with [`Error::ClusterUnreachable`](crate::Error::ClusterUnreachable).
    async fn connect(&self, endpoint: &ClusterEndpoint) -> Result<Arc<dyn ClusterClient>>;
}

// =============================================================================
// Cluster objects
// =============================================================================

/// A deployment or stateful set as seen on the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedWorkload {
    pub name: String,
    pub namespace: String,
    pub ready_replicas: i32,
}

impl ObservedWorkload {
    pub fn new(name: &str, namespace: &str, ready_replicas: i32) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ready_replicas,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready_replicas > 0
    }
}

/// One declared service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: i32,
    /// Port opened on every node for `NodePort`/`LoadBalancer` services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,
}

/// A service object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceObject {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

// =============================================================================
// Client
// =============================================================================

/// The subset of the cluster API the lifecycle manager needs.
///
/// Every call fails with `ClusterUnreachable` or `NotFound`;
/// `create_namespace` additionally with `AlreadyExists`.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<ObservedWorkload>>;

    async fn list_stateful_sets(&self, namespace: &str) -> Result<Vec<ObservedWorkload>>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<ServiceObject>;

    async fn create_namespace(&self, name: &str) -> Result<()>;
}
