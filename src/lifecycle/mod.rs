//! Tool lifecycle orchestration.
//!
//! - [`manager`]: Enable/Upgrade/Disable/SyncStatus/GetNodePort entry points
//! - [`tasks`]: per (cluster, tool) leases and the bounded background task set
//! - [`reconcile`]: pure projection of observed workloads onto tool records
//! - [`sync`]: periodic status synchronization loop

#[cfg(test)]
pub(crate) mod fixtures;
pub mod manager;
pub mod reconcile;
pub mod sync;
pub mod tasks;

pub use manager::{Collaborators, ToolLifecycleManager};
pub use reconcile::reconcile;
pub use sync::{StatusSyncService, SyncStats};
pub use tasks::{BackgroundTasks, Lease, LeaseInfo, OperationHandle, OperationKind};
