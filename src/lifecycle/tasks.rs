//! Background lifecycle tasks.
//!
//! Every install/upgrade/uninstall runs as a tokio task holding a lease on its
//! (cluster, tool) pair. While the lease is held, new lifecycle calls for the
//! pair are rejected; a short status-sync lease is waited out instead. A
//! semaphore bounds how many tasks execute at once, and a task tracker lets
//! callers await everything launched so far.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use crate::types::{ClusterName, Error, OperationId, Result, ToolName};

type LeaseKey = (ClusterName, ToolName);
type LeaseMap = HashMap<LeaseKey, LeaseInfo>;

/// How long a lifecycle call waits for a status sync to finish its write.
pub const SYNC_HOLD_WAIT: Duration = Duration::from_secs(5);

/// Which lifecycle operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Install,
    Upgrade,
    Uninstall,
    /// Short hold taken by a status sync while it writes one record.
    Sync,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Install => "install",
            OperationKind::Upgrade => "upgrade",
            OperationKind::Uninstall => "uninstall",
            OperationKind::Sync => "sync",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who holds a (cluster, tool) lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    pub operation: OperationId,
    pub kind: OperationKind,
    pub acquired_at: DateTime<Utc>,
}

/// Exclusive right to run one lifecycle operation on a (cluster, tool).
///
/// Released on drop, including when the owning task panics.
#[derive(Debug)]
pub struct Lease {
    key: LeaseKey,
    operation: OperationId,
    leases: Arc<Mutex<LeaseMap>>,
    released: Arc<Notify>,
}

impl Lease {
    pub fn operation(&self) -> OperationId {
        self.operation
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut leases = lock(&self.leases);
        if leases
            .get(&self.key)
            .is_some_and(|info| info.operation == self.operation)
        {
            leases.remove(&self.key);
        }
        drop(leases);
        self.released.notify_waiters();
    }
}

fn lock(leases: &Mutex<LeaseMap>) -> MutexGuard<'_, LeaseMap> {
    leases.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle on one spawned operation.
#[derive(Debug)]
pub struct OperationHandle {
    id: OperationId,
    handle: JoinHandle<()>,
}

impl OperationHandle {
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Wait for the task. A panic that escaped the task becomes `Internal`.
    pub async fn join(self) -> Result<()> {
        self.handle.await.map_err(|e| {
            if e.is_panic() {
                let payload = e.into_panic();
                Error::internal(format!(
                    "operation {} panicked: {}",
                    self.id,
                    panic_message(payload.as_ref())
                ))
            } else {
                Error::internal(format!("operation {} cancelled", self.id))
            }
        })
    }
}

/// Owner of all background lifecycle tasks.
pub struct BackgroundTasks {
    leases: Arc<Mutex<LeaseMap>>,
    released: Arc<Notify>,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTasks")
            .field("leases", &lock(&self.leases).len())
            .field("available_permits", &self.permits.available_permits())
            .field("tasks", &self.tracker.len())
            .finish()
    }
}

impl BackgroundTasks {
    /// `max_concurrent` is clamped to at least one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            released: Arc::new(Notify::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Take the lease on (cluster, tool), or fail with `ConflictingOperation`.
    pub fn try_lease(
        &self,
        cluster: &ClusterName,
        tool: &ToolName,
        kind: OperationKind,
    ) -> Result<Lease> {
        self.try_insert(cluster, tool, kind)
            .map_err(|holder| conflict(cluster, tool, kind, &holder))
    }

    /// Take the lease for a lifecycle operation.
    ///
    /// A lease held by a status sync covers a single record write, so this
    /// waits up to [`SYNC_HOLD_WAIT`] for it. A lease held by another
    /// lifecycle operation fails immediately with `ConflictingOperation`.
    pub async fn acquire(
        &self,
        cluster: &ClusterName,
        tool: &ToolName,
        kind: OperationKind,
    ) -> Result<Lease> {
        let deadline = Instant::now() + SYNC_HOLD_WAIT;
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let holder = match self.try_insert(cluster, tool, kind) {
                Ok(lease) => return Ok(lease),
                Err(holder) => holder,
            };
            if holder.kind != OperationKind::Sync {
                return Err(conflict(cluster, tool, kind, &holder));
            }

            tracing::debug!(
                "lifecycle_lease_waiting_for_sync: cluster={}, tool={}, requested={}",
                cluster,
                tool,
                kind
            );
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return self.try_lease(cluster, tool, kind);
            }
        }
    }

    fn try_insert(
        &self,
        cluster: &ClusterName,
        tool: &ToolName,
        kind: OperationKind,
    ) -> std::result::Result<Lease, LeaseInfo> {
        let key = (cluster.clone(), tool.clone());
        let mut leases = lock(&self.leases);
        if let Some(holder) = leases.get(&key) {
            return Err(holder.clone());
        }

        let operation = OperationId::new();
        leases.insert(
            key.clone(),
            LeaseInfo {
                operation,
                kind,
                acquired_at: Utc::now(),
            },
        );
        Ok(Lease {
            key,
            operation,
            leases: self.leases.clone(),
            released: self.released.clone(),
        })
    }

    /// Current holder of the (cluster, tool) lease.
    pub fn lease_info(&self, cluster: &ClusterName, tool: &ToolName) -> Option<LeaseInfo> {
        lock(&self.leases)
            .get(&(cluster.clone(), tool.clone()))
            .cloned()
    }

    pub fn is_leased(&self, cluster: &ClusterName, tool: &ToolName) -> bool {
        self.lease_info(cluster, tool).is_some()
    }

    /// Run `task` in the background under `lease`.
    ///
    /// The task waits for an execution slot first; the lease is held from
    /// now until the task ends.
    pub fn spawn<F>(&self, lease: Lease, task: F) -> OperationHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = lease.operation;
        let permits = self.permits.clone();
        let handle = self.tracker.spawn(async move {
            let _lease = lease;
            // The semaphore is never closed, so acquire only fails if it were.
            let _permit = permits.acquire_owned().await.ok();
            task.await;
        });
        OperationHandle { id, handle }
    }

    /// Number of tasks not yet finished.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Wait until every task spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

fn conflict(
    cluster: &ClusterName,
    tool: &ToolName,
    requested: OperationKind,
    holder: &LeaseInfo,
) -> Error {
    tracing::warn!(
        "lifecycle_operation_rejected: cluster={}, tool={}, requested={}, in_flight={}, operation={}",
        cluster,
        tool,
        requested,
        holder.kind,
        holder.operation
    );
    Error::ConflictingOperation {
        cluster: cluster.to_string(),
        tool: tool.to_string(),
    }
}

/// Run a future, converting a panic into `Error::Internal`.
///
/// Installer implementations are third-party code; a panic in one must
/// still produce a terminal status for the tool.
pub async fn catch_panic<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(operation).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            tracing::error!(
                "operation_panic_recovered: operation={}, panic={}",
                operation_name,
                msg
            );
            Err(Error::internal(format!("panic in {}: {}", operation_name, msg)))
        }
    }
}

/// Extract panic message from panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn key() -> (ClusterName, ToolName) {
        (
            ClusterName::parse("prod").unwrap(),
            ToolName::parse("grafana").unwrap(),
        )
    }

    #[test]
    fn test_lease_conflict_and_release() {
        let tasks = BackgroundTasks::new(4);
        let (cluster, tool) = key();

        let lease = tasks
            .try_lease(&cluster, &tool, OperationKind::Install)
            .unwrap();
        assert!(tasks.is_leased(&cluster, &tool));

        let err = tasks
            .try_lease(&cluster, &tool, OperationKind::Uninstall)
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingOperation { .. }));

        drop(lease);
        assert!(!tasks.is_leased(&cluster, &tool));
        assert!(tasks.try_lease(&cluster, &tool, OperationKind::Upgrade).is_ok());
    }

    #[test]
    fn test_leases_are_per_tool() {
        let tasks = BackgroundTasks::new(4);
        let (cluster, tool) = key();
        let _a = tasks
            .try_lease(&cluster, &tool, OperationKind::Install)
            .unwrap();
        let other = ToolName::parse("loki").unwrap();
        assert!(tasks
            .try_lease(&cluster, &other, OperationKind::Install)
            .is_ok());
    }

    #[tokio::test]
    async fn test_spawn_releases_lease_on_completion() {
        let tasks = BackgroundTasks::new(4);
        let (cluster, tool) = key();
        let lease = tasks
            .try_lease(&cluster, &tool, OperationKind::Install)
            .unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tasks.spawn(lease, async move {
            let _ = rx.await;
        });
        assert!(tasks.is_leased(&cluster, &tool));
        assert_eq!(tasks.len(), 1);

        tx.send(()).unwrap();
        handle.join().await.unwrap();
        assert!(!tasks.is_leased(&cluster, &tool));
    }

    #[tokio::test]
    async fn test_panicking_task_releases_lease() {
        let tasks = BackgroundTasks::new(1);
        let (cluster, tool) = key();
        let lease = tasks
            .try_lease(&cluster, &tool, OperationKind::Upgrade)
            .unwrap();

        let handle = tasks.spawn(lease, async {
            panic!("chart exploded");
        });
        let err = handle.join().await.unwrap_err();
        assert!(err.to_string().contains("chart exploded"));
        assert!(!tasks.is_leased(&cluster, &tool));
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let tasks = BackgroundTasks::new(1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let cluster = ClusterName::parse("prod").unwrap();

        for name in ["a", "b", "c"] {
            let tool = ToolName::parse(name).unwrap();
            let lease = tasks
                .try_lease(&cluster, &tool, OperationKind::Install)
                .unwrap();
            let running = running.clone();
            let peak = peak.clone();
            tasks.spawn(lease, async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        tasks.wait_idle().await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_wait_idle_allows_more_work() {
        let tasks = BackgroundTasks::new(2);
        tasks.wait_idle().await;

        let (cluster, tool) = key();
        let lease = tasks
            .try_lease(&cluster, &tool, OperationKind::Install)
            .unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        let flag = done.clone();
        tasks.spawn(lease, async move {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        tasks.wait_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_sync_write() {
        let tasks = Arc::new(BackgroundTasks::new(2));
        let (cluster, tool) = key();
        let sync = tasks.try_lease(&cluster, &tool, OperationKind::Sync).unwrap();

        let waiter = {
            let tasks = tasks.clone();
            let (cluster, tool) = (cluster.clone(), tool.clone());
            tokio::spawn(async move {
                tasks
                    .acquire(&cluster, &tool, OperationKind::Install)
                    .await
                    .map(|lease| lease.operation())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(sync);

        assert!(waiter.await.unwrap().is_ok());
        assert!(!tasks.is_leased(&cluster, &tool));
    }

    #[tokio::test]
    async fn test_acquire_rejects_lifecycle_holder_immediately() {
        let tasks = BackgroundTasks::new(2);
        let (cluster, tool) = key();
        let _install = tasks
            .try_lease(&cluster, &tool, OperationKind::Install)
            .unwrap();

        let err = tokio::time::timeout(
            Duration::from_millis(100),
            tasks.acquire(&cluster, &tool, OperationKind::Uninstall),
        )
        .await
        .expect("a lifecycle holder must not be waited on")
        .unwrap_err();
        assert!(matches!(err, Error::ConflictingOperation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_gives_up_on_stuck_sync() {
        let tasks = BackgroundTasks::new(2);
        let (cluster, tool) = key();
        let _sync = tasks.try_lease(&cluster, &tool, OperationKind::Sync).unwrap();

        let err = tasks
            .acquire(&cluster, &tool, OperationKind::Install)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConflictingOperation { .. }));
    }

    #[tokio::test]
    async fn test_catch_panic() {
        let ok = catch_panic(async { Ok::<_, Error>(7) }, "noop").await.unwrap();
        assert_eq!(ok, 7);

        let err = catch_panic(
            async {
                if ok == 7 {
                    panic!("boom");
                }
                Ok::<_, Error>(())
            },
            "install",
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "internal error: panic in install: boom");
    }
}
