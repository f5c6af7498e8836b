//! Tool lifecycle manager.
//!
//! Every lifecycle call follows the same shape: check preconditions, take
//! the (cluster, tool) lease, persist the in-progress status, then hand the
//! slow part to a background task that writes the terminal status. The caller
//! gets the in-progress record back immediately.

use std::fmt;
use std::sync::Arc;

use super::reconcile::reconcile;
use super::tasks::{catch_panic, BackgroundTasks, Lease, LeaseInfo, OperationKind};
use crate::cluster::{ClusterClient, ClusterConnector, ClusterDirectory, ClusterProbe};
use crate::installer::{InstallIntent, Installer, InstallerContext, InstallerFactory};
use crate::store::ToolRecordStore;
use crate::tools::{
    StoredToolRecord, ToolDescriptorTable, ToolDetail, ToolDetailCatalog, ToolRecord,
    ToolRequest, ToolStatus,
};
use crate::types::{ClusterName, Error, LifecycleConfig, Result, ToolName};

/// External systems the manager coordinates.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ToolRecordStore>,
    pub directory: Arc<dyn ClusterDirectory>,
    pub connector: Arc<dyn ClusterConnector>,
    pub catalog: Arc<dyn ToolDetailCatalog>,
    pub installers: Arc<dyn InstallerFactory>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// The work a background task performs.
enum Job {
    Install(ToolDetail),
    Upgrade(ToolDetail),
    Uninstall,
}

impl Job {
    fn kind(&self) -> OperationKind {
        match self {
            Job::Install(_) => OperationKind::Install,
            Job::Upgrade(_) => OperationKind::Upgrade,
            Job::Uninstall => OperationKind::Uninstall,
        }
    }

    async fn run(&self, installer: &dyn Installer) -> Result<()> {
        match self {
            Job::Install(detail) => installer.install(detail).await,
            Job::Upgrade(detail) => installer.upgrade(detail).await,
            Job::Uninstall => installer.uninstall().await,
        }
    }

    /// Status written when the installer succeeds.
    fn success_status(&self) -> ToolStatus {
        match self {
            Job::Install(_) | Job::Upgrade(_) => ToolStatus::Running,
            Job::Uninstall => ToolStatus::Waiting,
        }
    }
}

/// Installs, upgrades, disables and reconciles add-on tools on clusters.
pub struct ToolLifecycleManager {
    store: Arc<dyn ToolRecordStore>,
    directory: Arc<dyn ClusterDirectory>,
    connector: Arc<dyn ClusterConnector>,
    catalog: Arc<dyn ToolDetailCatalog>,
    installers: Arc<dyn InstallerFactory>,
    descriptors: Arc<ToolDescriptorTable>,
    config: LifecycleConfig,
    tasks: BackgroundTasks,
}

impl fmt::Debug for ToolLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolLifecycleManager")
            .field("descriptors", &self.descriptors.len())
            .field("config", &self.config)
            .field("tasks", &self.tasks)
            .finish_non_exhaustive()
    }
}

impl ToolLifecycleManager {
    pub fn new(
        collaborators: Collaborators,
        descriptors: ToolDescriptorTable,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store: collaborators.store,
            directory: collaborators.directory,
            connector: collaborators.connector,
            catalog: collaborators.catalog,
            installers: collaborators.installers,
            descriptors: Arc::new(descriptors),
            tasks: BackgroundTasks::new(config.max_background_tasks),
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &ToolDescriptorTable {
        &self.descriptors
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Lease holder for (cluster, tool), if an operation is in flight.
    pub fn in_flight(&self, cluster: &ClusterName, tool: &ToolName) -> Option<LeaseInfo> {
        self.tasks.lease_info(cluster, tool)
    }

    /// Wait for every background operation launched so far.
    pub async fn wait_idle(&self) {
        self.tasks.wait_idle().await;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// All tool records of a cluster.
    pub async fn list(&self, cluster: &ClusterName) -> Result<Vec<ToolRecord>> {
        let stored = self.store.list(cluster).await?;
        Ok(stored.into_iter().map(StoredToolRecord::decode).collect())
    }

    /// Node port of the service exposing a tool's UI.
    pub async fn get_node_port(
        &self,
        cluster: &ClusterName,
        tool: &ToolName,
        version: &str,
        namespace: &str,
    ) -> Result<String> {
        let endpoint = self.directory.resolve(cluster).await?;
        let service = self
            .descriptors
            .get(tool.as_str())
            .and_then(|d| d.service_name.as_deref())
            .ok_or_else(|| Error::not_found(format!("tool {} exposes no service", tool)))?;

        tracing::debug!(
            "tool_node_port_lookup: cluster={}, tool={}, version={}, service={}/{}",
            cluster,
            tool,
            version,
            namespace,
            service
        );
        let client = self.connector.connect(&endpoint).await?;
        let svc = client.get_service(namespace, service).await?;

        svc.ports
            .first()
            .and_then(|p| p.node_port)
            .map(|port| port.to_string())
            .ok_or_else(|| Error::ServiceNotExposed {
                cluster: cluster.to_string(),
                service: service.to_string(),
                namespace: namespace.to_string(),
            })
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Install a tool. Returns the `Initializing` record; the install itself
    /// runs in the background.
    pub async fn enable(&self, cluster: &ClusterName, request: ToolRequest) -> Result<ToolRecord> {
        let endpoint = self.directory.resolve(cluster).await?;
        let detail = self.catalog.get(&request.name, &request.version).await?;
        self.validate_settings(&request)?;

        let namespace = request
            .vars
            .namespace_or(&self.config.default_namespace)
            .to_string();
        let previous_namespace = self
            .load(cluster, &request.name)
            .await?
            .and_then(|r| r.vars.namespace)
            .unwrap_or_else(|| namespace.clone());

        let lease = self
            .tasks
            .acquire(cluster, &request.name, OperationKind::Install)
            .await?;
        let client = self.connector.connect(&endpoint).await?;
        ensure_namespace(client.as_ref(), &namespace).await?;

        let mut record = ToolRecord::new(cluster.clone(), request.name, request.version);
        record.higher_version = request.higher_version;
        record.vars = request.vars;
        record.vars.namespace = Some(namespace.clone());
        record.transition(ToolStatus::Initializing);

        let installer = self.installers.build(InstallerContext {
            tool: record.clone(),
            endpoint,
            previous_namespace,
            namespace,
            intent: InstallIntent::Install,
        })?;

        self.save(&record).await?;
        self.launch(lease, record.clone(), installer, Job::Install(detail));
        Ok(record)
    }

    /// Upgrade a tool to its pending higher version. The version bump is
    /// persisted immediately and kept even if the upgrade later fails.
    pub async fn upgrade(&self, cluster: &ClusterName, request: ToolRequest) -> Result<ToolRecord> {
        let endpoint = self.directory.resolve(cluster).await?;
        let target = request
            .higher_version
            .clone()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                Error::unknown_tool_version(request.name.as_str(), "<no higher version>")
            })?;
        let detail = self.catalog.get(&request.name, &target).await?;
        self.validate_settings(&request)?;

        let namespace = request
            .vars
            .namespace_or(&self.config.default_namespace)
            .to_string();
        let lease = self
            .tasks
            .acquire(cluster, &request.name, OperationKind::Upgrade)
            .await?;

        let mut record = ToolRecord::new(cluster.clone(), request.name, target);
        record.vars = request.vars;
        record.vars.namespace = Some(namespace.clone());
        record.transition(ToolStatus::Upgrading);

        let installer = self.installers.build(InstallerContext {
            tool: record.clone(),
            endpoint,
            previous_namespace: namespace.clone(),
            namespace,
            intent: InstallIntent::Install,
        })?;

        self.save(&record).await?;
        self.launch(lease, record.clone(), installer, Job::Upgrade(detail));
        Ok(record)
    }

    /// Uninstall a tool. The record is kept and returns to `Waiting` once the
    /// uninstall succeeds.
    pub async fn disable(&self, cluster: &ClusterName, request: ToolRequest) -> Result<ToolRecord> {
        let endpoint = self.directory.resolve(cluster).await?;
        let lease = self
            .tasks
            .acquire(cluster, &request.name, OperationKind::Uninstall)
            .await?;

        let stored = self.load(cluster, &request.name).await?;
        // Request namespace first, then where the tool was recorded.
        let namespace = request
            .vars
            .namespace
            .clone()
            .or_else(|| stored.as_ref().and_then(|r| r.vars.namespace.clone()))
            .unwrap_or_else(|| self.config.default_namespace.clone());

        let mut record = match stored {
            Some(existing) => existing,
            None => {
                let mut fresh =
                    ToolRecord::new(cluster.clone(), request.name.clone(), request.version);
                fresh.vars = request.vars;
                fresh
            }
        };
        record.vars.namespace = Some(namespace.clone());
        record.transition(ToolStatus::Terminating);

        let installer = self.installers.build(InstallerContext {
            tool: record.clone(),
            endpoint,
            previous_namespace: namespace.clone(),
            namespace,
            intent: InstallIntent::Remove,
        })?;

        self.save(&record).await?;
        self.launch(lease, record.clone(), installer, Job::Uninstall);
        Ok(record)
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Recompute every tool's status from the live cluster.
    ///
    /// Only changed records are written. Tools with an operation in flight
    /// are left to that operation. Each record is re-read under its lease
    /// before reconciling, so writes made while the cluster was being read are
    /// never overwritten. A failed write does not stop the pass; write
    /// failures are returned as `Storage`, otherwise a catalog refresh
    /// failure as `CatalogRefresh`, after everything else is committed.
    pub async fn sync_status(&self, cluster: &ClusterName) -> Result<Vec<ToolRecord>> {
        let endpoint = self.directory.resolve(cluster).await?;
        let listed = self.list(cluster).await?;
        let client = self.connector.connect(&endpoint).await?;
        let snapshot = ClusterProbe::new(client).observe().await?;

        let mut synced = Vec::with_capacity(listed.len());
        let mut changed = 0usize;
        let mut write_failures: Vec<String> = Vec::new();
        for listed_record in listed {
            // Hold the lease across read and write so a lifecycle call cannot
            // interleave with either.
            let leased = self
                .tasks
                .try_lease(cluster, &listed_record.name, OperationKind::Sync);
            let _guard = match leased {
                Ok(lease) => lease,
                Err(_) => {
                    tracing::debug!(
                        "tool_sync_skipped: cluster={}, tool={}, reason=operation_in_flight",
                        cluster,
                        listed_record.name
                    );
                    synced.push(listed_record);
                    continue;
                }
            };

            let record = match self.load(cluster, &listed_record.name).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::debug!(
                        "tool_sync_skipped: cluster={}, tool={}, reason=record_removed",
                        cluster,
                        listed_record.name
                    );
                    continue;
                }
                Err(e) => {
                    tracing::error!(
                        "tool_status_read_failed: cluster={}, tool={}, error={}",
                        cluster,
                        listed_record.name,
                        e
                    );
                    write_failures.push(format!("{}: {}", listed_record.name, e));
                    synced.push(listed_record);
                    continue;
                }
            };

            if record.status.is_in_progress() {
                // In progress with no lease held: the owning task is gone.
                tracing::warn!(
                    "tool_operation_orphaned: cluster={}, tool={}, status={}",
                    cluster,
                    record.name,
                    record.status
                );
            }

            let Some(updated) = reconcile(&record, &snapshot, &self.descriptors) else {
                synced.push(record);
                continue;
            };

            tracing::info!(
                "tool_status_reconciled: cluster={}, tool={}, from={}, to={}, namespace={}",
                cluster,
                updated.name,
                record.status,
                updated.status,
                updated.vars.namespace.as_deref().unwrap_or("-")
            );
            match self.save(&updated).await {
                Ok(()) => {
                    changed += 1;
                    synced.push(updated);
                }
                Err(e) => {
                    tracing::error!(
                        "tool_status_write_failed: cluster={}, tool={}, status={}, error={}",
                        cluster,
                        updated.name,
                        updated.status,
                        e
                    );
                    write_failures.push(format!("{}: {}", updated.name, e));
                    synced.push(record);
                }
            }
        }

        tracing::debug!(
            "tool_sync_completed: cluster={}, tools={}, changed={}, failed={}",
            cluster,
            synced.len(),
            changed,
            write_failures.len()
        );

        let refreshed = self.catalog.refresh(&endpoint.architecture).await;
        if let Err(e) = &refreshed {
            tracing::warn!(
                "tool_catalog_refresh_failed: cluster={}, architecture={}, error={}",
                cluster,
                endpoint.architecture,
                e
            );
        }

        if !write_failures.is_empty() {
            return Err(Error::storage(format!(
                "{} tool status update(s) failed on cluster {}: {}",
                write_failures.len(),
                cluster,
                write_failures.join("; ")
            )));
        }
        refreshed.map_err(|e| Error::CatalogRefresh(e.to_string()))?;

        Ok(synced)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn validate_settings(&self, request: &ToolRequest) -> Result<()> {
        match self.descriptors.get(request.name.as_str()) {
            Some(descriptor) => descriptor.validate_settings(&request.vars),
            None => Ok(()),
        }
    }

    async fn load(&self, cluster: &ClusterName, tool: &ToolName) -> Result<Option<ToolRecord>> {
        Ok(self
            .store
            .get(cluster, tool)
            .await?
            .map(StoredToolRecord::decode))
    }

    async fn save(&self, record: &ToolRecord) -> Result<()> {
        self.store.upsert(record.to_stored()?).await
    }

    fn launch(
        &self,
        lease: Lease,
        record: ToolRecord,
        installer: Box<dyn Installer>,
        job: Job,
    ) {
        let store = self.store.clone();
        let operation = lease.operation();
        tracing::info!(
            "tool_operation_started: operation={}, kind={}, cluster={}, tool={}, version={}",
            operation,
            job.kind(),
            record.cluster,
            record.name,
            record.version
        );

        // Detached; the task tracker keeps it observable through `wait_idle`.
        let _detached = self.tasks.spawn(lease, async move {
            let outcome = catch_panic(job.run(installer.as_ref()), job.kind().as_str()).await;
            complete(store.as_ref(), record, &job, outcome).await;
        });
    }
}

/// Write the terminal status of a finished background operation.
async fn complete(
    store: &dyn ToolRecordStore,
    mut record: ToolRecord,
    job: &Job,
    outcome: Result<()>,
) {
    match outcome {
        Ok(()) => {
            tracing::info!(
                "tool_operation_succeeded: kind={}, cluster={}, tool={}",
                job.kind(),
                record.cluster,
                record.name
            );
            record.transition(job.success_status());
        }
        Err(e) => {
            let message = match e {
                Error::InstallerFailure(msg) => msg,
                other => other.to_string(),
            };
            tracing::error!(
                "tool_operation_failed: kind={}, cluster={}, tool={}, error={}",
                job.kind(),
                record.cluster,
                record.name,
                message
            );
            record.fail(message);
        }
    }

    let written = match record.to_stored() {
        Ok(stored) => store.upsert(stored).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        tracing::error!(
            "tool_status_write_failed: cluster={}, tool={}, status={}, error={}",
            record.cluster,
            record.name,
            record.status,
            e
        );
    }
}

/// Create `namespace` unless it already exists. Losing a creation race to
/// another writer is not an error.
async fn ensure_namespace(client: &dyn ClusterClient, namespace: &str) -> Result<()> {
    if client
        .list_namespaces()
        .await?
        .iter()
        .any(|ns| ns == namespace)
    {
        return Ok(());
    }

    match client.create_namespace(namespace).await {
        Ok(()) => {
            tracing::info!("namespace_created: namespace={}", namespace);
            Ok(())
        }
        Err(Error::AlreadyExists(_)) => {
            tracing::debug!("namespace_create_raced: namespace={}", namespace);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
