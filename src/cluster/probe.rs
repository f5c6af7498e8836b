//! Cluster probe: one batched read of every workload on a cluster.
//!
//! Reconciliation scans the resulting snapshot per tool, so a sync costs
//! O(namespaces) API calls regardless of how many tools are enabled.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;

use super::{ClusterClient, ObservedWorkload};
use crate::tools::WorkloadKind;
use crate::types::Result;

/// All deployments and stateful sets of a cluster at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadSnapshot {
    pub deployments: Vec<ObservedWorkload>,
    pub stateful_sets: Vec<ObservedWorkload>,
}

impl WorkloadSnapshot {
    /// First workload of `kind` named `name`, in namespace listing order.
    pub fn find(&self, kind: WorkloadKind, name: &str) -> Option<&ObservedWorkload> {
        let pool = match kind {
            WorkloadKind::Deployment => &self.deployments,
            WorkloadKind::StatefulSet => &self.stateful_sets,
        };
        pool.iter().find(|w| w.name == name)
    }

    pub fn len(&self) -> usize {
        self.deployments.len() + self.stateful_sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Namespaces listed at once by default.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 8;

/// Stateless reader over a live cluster client.
#[derive(Clone)]
pub struct ClusterProbe {
    client: Arc<dyn ClusterClient>,
    concurrency: usize,
}

impl std::fmt::Debug for ClusterProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterProbe")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl ClusterProbe {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self {
            client,
            concurrency: DEFAULT_PROBE_CONCURRENCY,
        }
    }

    /// Bound how many namespaces are listed at once (at least one).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// List namespaces, then every namespace's deployments and stateful sets.
    ///
    /// Up to `concurrency` namespaces are queried at once; results keep
    /// namespace listing order. The first failing call aborts the whole
    /// observation.
    pub async fn observe(&self) -> Result<WorkloadSnapshot> {
        let namespaces = self.client.list_namespaces().await?;

        let per_namespace: Vec<_> = stream::iter(namespaces.iter().cloned().map(|ns| async move {
            let deployments = self.client.list_deployments(&ns).await?;
            let stateful_sets = self.client.list_stateful_sets(&ns).await?;
            Ok::<_, crate::Error>((deployments, stateful_sets))
        }))
        .buffered(self.concurrency)
        .try_collect()
        .await?;

        let mut snapshot = WorkloadSnapshot::default();
        for (deployments, stateful_sets) in per_namespace {
            snapshot.deployments.extend(deployments);
            snapshot.stateful_sets.extend(stateful_sets);
        }

        tracing::debug!(
            "cluster_probe_completed: namespaces={}, deployments={}, stateful_sets={}",
            namespaces.len(),
            snapshot.deployments.len(),
            snapshot.stateful_sets.len()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InMemoryCluster, ServiceObject};
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the in-memory cluster and records peak concurrent list calls.
    struct CountingClient {
        inner: InMemoryCluster,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl CountingClient {
        async fn track<T>(&self, call: impl std::future::Future<Output = T>) -> T {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let out = call.await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            out
        }
    }

    #[async_trait]
    impl ClusterClient for CountingClient {
        async fn list_namespaces(&self) -> Result<Vec<String>> {
            self.inner.list_namespaces().await
        }

        async fn list_deployments(&self, namespace: &str) -> Result<Vec<ObservedWorkload>> {
            self.track(self.inner.list_deployments(namespace)).await
        }

        async fn list_stateful_sets(&self, namespace: &str) -> Result<Vec<ObservedWorkload>> {
            self.track(self.inner.list_stateful_sets(namespace)).await
        }

        async fn get_service(&self, namespace: &str, name: &str) -> Result<ServiceObject> {
            self.inner.get_service(namespace, name).await
        }

        async fn create_namespace(&self, name: &str) -> Result<()> {
            self.inner.create_namespace(name).await
        }
    }

    #[tokio::test]
    async fn test_observe_bounds_namespace_fan_out() {
        let inner = InMemoryCluster::new();
        for i in 0..12 {
            inner.add_deployment(ObservedWorkload::new(&format!("app-{}", i), &format!("ns-{:02}", i), 1));
        }
        let client = Arc::new(CountingClient {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let snapshot = ClusterProbe::new(client.clone())
            .with_concurrency(3)
            .observe()
            .await
            .unwrap();

        assert_eq!(snapshot.deployments.len(), 12);
        assert!(client.peak.load(Ordering::SeqCst) <= 3);
        // Listing order is preserved.
        assert_eq!(snapshot.deployments[0].namespace, "ns-00");
        assert_eq!(snapshot.deployments[11].namespace, "ns-11");
    }

    #[tokio::test]
    async fn test_observe_collects_all_namespaces() {
        let cluster = InMemoryCluster::new();
        cluster.add_deployment(ObservedWorkload::new("grafana", "monitoring", 1));
        cluster.add_deployment(ObservedWorkload::new("kubepi", "kube-operator", 0));
        cluster.add_stateful_set(ObservedWorkload::new("loki", "logs", 2));

        let snapshot = ClusterProbe::new(Arc::new(cluster)).observe().await.unwrap();
        assert_eq!(snapshot.deployments.len(), 2);
        assert_eq!(snapshot.stateful_sets.len(), 1);
        assert_eq!(
            snapshot.find(WorkloadKind::StatefulSet, "loki").unwrap().namespace,
            "logs"
        );
        // kind matters: loki is not a deployment
        assert!(snapshot.find(WorkloadKind::Deployment, "loki").is_none());
    }

    #[tokio::test]
    async fn test_observe_empty_cluster() {
        let snapshot = ClusterProbe::new(Arc::new(InMemoryCluster::new()))
            .observe()
            .await
            .unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_observe_unreachable() {
        let cluster = InMemoryCluster::new();
        cluster.set_reachable(false);
        let err = ClusterProbe::new(Arc::new(cluster)).observe().await.unwrap_err();
        assert!(matches!(err, Error::ClusterUnreachable(_)));
    }

    #[tokio::test]
    async fn test_observe_call_count_is_per_namespace() {
        let cluster = Arc::new(InMemoryCluster::new());
        cluster.add_namespace("a");
        cluster.add_namespace("b");
        cluster.add_namespace("c");

        ClusterProbe::new(cluster.clone()).observe().await.unwrap();
        // 1 namespace list + 2 lists per namespace
        assert_eq!(cluster.api_calls(), 1 + 2 * 3);
    }
}
