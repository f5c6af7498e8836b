//! Periodic status synchronization.
//!
//! Runs `SyncStatus` over a configured set of clusters on an interval. A
//! failing cluster is logged and counted; it never stops the loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::manager::ToolLifecycleManager;
use crate::types::{ClusterName, SyncConfig};

/// Statistics from one sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Clusters whose statuses were reconciled and catalog refreshed
    pub clusters_synced: usize,
    /// Clusters that returned an error (including catalog refresh failures)
    pub clusters_failed: usize,
    /// Tool records seen across successfully synced clusters
    pub tools_seen: usize,
    /// When the cycle completed
    pub completed_at: Option<DateTime<Utc>>,
}

/// Background loop driving [`ToolLifecycleManager::sync_status`].
#[derive(Debug)]
pub struct StatusSyncService {
    manager: Arc<ToolLifecycleManager>,
    config: SyncConfig,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl StatusSyncService {
    pub fn new(manager: Arc<ToolLifecycleManager>, config: SyncConfig) -> Self {
        Self {
            manager,
            config,
            stop_tx: None,
        }
    }

    /// Start the sync loop in the background. The first cycle runs
    /// immediately.
    pub fn start(&mut self) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let config = self.config.clone();
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::spawn(async move {
            let mut ticker = interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = Self::run_cycle(&manager, &config).await;
                        if stats.clusters_failed > 0 {
                            tracing::warn!(
                                "status_sync_cycle_degraded: synced={}, failed={}",
                                stats.clusters_synced,
                                stats.clusters_failed
                            );
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("status_sync_service_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the sync loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Run a single cycle in the caller's task.
    pub async fn run_once(&self) -> SyncStats {
        Self::run_cycle(&self.manager, &self.config).await
    }

    async fn run_cycle(manager: &ToolLifecycleManager, config: &SyncConfig) -> SyncStats {
        let mut stats = SyncStats::default();

        for raw in &config.clusters {
            let cluster = match ClusterName::parse(raw.as_str()) {
                Ok(cluster) => cluster,
                Err(e) => {
                    tracing::error!("status_sync_invalid_cluster: cluster={}, error={}", raw, e);
                    stats.clusters_failed += 1;
                    continue;
                }
            };

            match manager.sync_status(&cluster).await {
                Ok(records) => {
                    stats.clusters_synced += 1;
                    stats.tools_seen += records.len();
                }
                Err(e) => {
                    tracing::error!(
                        "status_sync_cluster_failed: cluster={}, transient={}, error={}",
                        cluster,
                        e.is_transient(),
                        e
                    );
                    stats.clusters_failed += 1;
                }
            }
        }

        tracing::debug!(
            "status_sync_cycle_completed: synced={}, failed={}, tools={}",
            stats.clusters_synced,
            stats.clusters_failed,
            stats.tools_seen
        );

        stats.completed_at = Some(Utc::now());
        stats
    }
}
