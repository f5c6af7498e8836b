//! In-memory cluster, directory and connector.
//!
//! Simulates the cluster API without a control plane, for development and
//! tests. Counts API calls and can be switched unreachable.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{
    ClusterClient, ClusterConnector, ClusterDirectory, ClusterEndpoint, ObservedWorkload,
    ServiceObject,
};
use crate::types::{ClusterName, Error, Result};

#[derive(Debug, Default)]
struct ClusterState {
    namespaces: BTreeSet<String>,
    deployments: Vec<ObservedWorkload>,
    stateful_sets: Vec<ObservedWorkload>,
    services: BTreeMap<(String, String), ServiceObject>,
}

/// In-memory [`ClusterClient`].
#[derive(Debug)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
    reachable: AtomicBool,
    stale_namespace_list: AtomicBool,
    api_calls: AtomicUsize,
    namespaces_created: AtomicUsize,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClusterState::default()),
            reachable: AtomicBool::new(true),
            stale_namespace_list: AtomicBool::new(false),
            api_calls: AtomicUsize::new(0),
            namespaces_created: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_namespace(&self, name: &str) {
        self.state().namespaces.insert(name.to_string());
    }

    /// Add or replace a deployment (by namespace and name).
    pub fn add_deployment(&self, workload: ObservedWorkload) {
        let mut state = self.state();
        state.namespaces.insert(workload.namespace.clone());
        upsert_workload(&mut state.deployments, workload);
    }

    /// Add or replace a stateful set (by namespace and name).
    pub fn add_stateful_set(&self, workload: ObservedWorkload) {
        let mut state = self.state();
        state.namespaces.insert(workload.namespace.clone());
        upsert_workload(&mut state.stateful_sets, workload);
    }

    /// Remove deployments and stateful sets with this name from every namespace.
    pub fn remove_workload(&self, name: &str) {
        let mut state = self.state();
        state.deployments.retain(|w| w.name != name);
        state.stateful_sets.retain(|w| w.name != name);
    }

    /// Change the ready replica count of every workload with this name.
    pub fn set_ready_replicas(&self, name: &str, ready_replicas: i32) {
        let mut guard = self.state();
        let state = &mut *guard;
        for w in state
            .deployments
            .iter_mut()
            .chain(state.stateful_sets.iter_mut())
            .filter(|w| w.name == name)
        {
            w.ready_replicas = ready_replicas;
        }
    }

    pub fn add_service(&self, service: ServiceObject) {
        let mut state = self.state();
        state.namespaces.insert(service.namespace.clone());
        state
            .services
            .insert((service.namespace.clone(), service.name.clone()), service);
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state().namespaces.contains(name)
    }

    /// Make every API call fail with [`Error::ClusterUnreachable`].
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Make `list_namespaces` return nothing, as if another writer created
    /// namespaces after our read.
    pub fn set_stale_namespace_list(&self, stale: bool) {
        self.stale_namespace_list.store(stale, Ordering::SeqCst);
    }

    /// Number of API calls served (or refused) so far.
    pub fn api_calls(&self) -> usize {
        self.api_calls.load(Ordering::SeqCst)
    }

    /// Number of namespaces actually created through the API.
    pub fn namespaces_created(&self) -> usize {
        self.namespaces_created.load(Ordering::SeqCst)
    }

    fn call(&self) -> Result<()> {
        self.api_calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::unreachable("in-memory cluster is offline"))
        }
    }

    fn workloads_in(pool: &[ObservedWorkload], namespace: &str) -> Result<Vec<ObservedWorkload>> {
        Ok(pool
            .iter()
            .filter(|w| w.namespace == namespace)
            .cloned()
            .collect())
    }
}

fn upsert_workload(pool: &mut Vec<ObservedWorkload>, workload: ObservedWorkload) {
    pool.retain(|w| !(w.name == workload.name && w.namespace == workload.namespace));
    pool.push(workload);
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        self.call()?;
        if self.stale_namespace_list.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        Ok(self.state().namespaces.iter().cloned().collect())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<ObservedWorkload>> {
        self.call()?;
        let state = self.state();
        if !state.namespaces.contains(namespace) {
            return Err(Error::not_found(format!("namespace {}", namespace)));
        }
        Self::workloads_in(&state.deployments, namespace)
    }

    async fn list_stateful_sets(&self, namespace: &str) -> Result<Vec<ObservedWorkload>> {
        self.call()?;
        let state = self.state();
        if !state.namespaces.contains(namespace) {
            return Err(Error::not_found(format!("namespace {}", namespace)));
        }
        Self::workloads_in(&state.stateful_sets, namespace)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<ServiceObject> {
        self.call()?;
        self.state()
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::not_found(format!("service {}/{}", namespace, name)))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        self.call()?;
        if !self.state().namespaces.insert(name.to_string()) {
            return Err(Error::already_exists(format!("namespace {}", name)));
        }
        self.namespaces_created.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Directory and connector
// =============================================================================

/// Fixed cluster directory.
#[derive(Debug, Default)]
pub struct StaticClusterDirectory {
    endpoints: HashMap<ClusterName, ClusterEndpoint>,
}

impl StaticClusterDirectory {
    pub fn new(endpoints: impl IntoIterator<Item = ClusterEndpoint>) -> Self {
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect(),
        }
    }
}

#[async_trait]
impl ClusterDirectory for StaticClusterDirectory {
    async fn resolve(&self, cluster: &ClusterName) -> Result<ClusterEndpoint> {
        self.endpoints
            .get(cluster)
            .cloned()
            .ok_or_else(|| Error::cluster_not_found(cluster.as_str()))
    }
}

/// Connector handing out pre-built clients by cluster name.
#[derive(Default)]
pub struct StaticConnector {
    clients: HashMap<ClusterName, Arc<dyn ClusterClient>>,
}

impl std::fmt::Debug for StaticConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticConnector")
            .field("clusters", &self.clients.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StaticConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, cluster: ClusterName, client: Arc<dyn ClusterClient>) -> Self {
        self.clients.insert(cluster, client);
        self
    }
}

#[async_trait]
impl ClusterConnector for StaticConnector {
    async fn connect(&self, endpoint: &ClusterEndpoint) -> Result<Arc<dyn ClusterClient>> {
        self.clients.get(&endpoint.name).cloned().ok_or_else(|| {
            Error::unreachable(format!(
                "no route to cluster {} ({})",
                endpoint.name,
                endpoint.hosts.join(",")
            ))
        })
    }
}
