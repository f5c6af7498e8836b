//! Tool record repository contract and an in-memory implementation.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::tools::StoredToolRecord;
use crate::types::{ClusterName, Error, Result, ToolName};

/// Persistence for tool records, one row per (cluster, tool name).
///
/// Writes are whole-record upserts; the last writer wins.
#[async_trait]
pub trait ToolRecordStore: Send + Sync {
    /// All records of a cluster, ordered by tool name.
    async fn list(&self, cluster: &ClusterName) -> Result<Vec<StoredToolRecord>>;

    /// The record for (cluster, tool), if one was ever written.
    async fn get(&self, cluster: &ClusterName, tool: &ToolName)
        -> Result<Option<StoredToolRecord>>;

    /// Insert or replace the record keyed by (record.cluster, record.name).
    async fn upsert(&self, record: StoredToolRecord) -> Result<()>;
}

/// In-memory record store.
///
/// Suitable for tests, development and single-process embedding where
/// records need not survive a restart. Counts upserts so callers can check
/// that reconciliation does not write unchanged records.
#[derive(Debug, Default)]
pub struct InMemoryToolStore {
    records: RwLock<BTreeMap<(ClusterName, ToolName), StoredToolRecord>>,
    upserts: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryToolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of upserts accepted so far.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Simulate a database outage: every call fails with [`Error::Storage`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop a record, as an out-of-band deletion would. Returns whether it
    /// existed.
    pub async fn remove(&self, cluster: &ClusterName, tool: &ToolName) -> bool {
        let mut records = self.records.write().await;
        records.remove(&(cluster.clone(), tool.clone())).is_some()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::storage("tool record store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolRecordStore for InMemoryToolStore {
    async fn list(&self, cluster: &ClusterName) -> Result<Vec<StoredToolRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((c, _), _)| c == cluster)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn get(
        &self,
        cluster: &ClusterName,
        tool: &ToolName,
    ) -> Result<Option<StoredToolRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records.get(&(cluster.clone(), tool.clone())).cloned())
    }

    async fn upsert(&self, record: StoredToolRecord) -> Result<()> {
        self.check_available()?;
        let mut records = self.records.write().await;
        records.insert((record.cluster.clone(), record.name.clone()), record);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
