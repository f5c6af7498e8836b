//! # Cluster Tools - Add-on Tool Lifecycle Manager
//!
//! Manages optional add-on tools (registry, chart repository, dashboards,
//! monitoring and log aggregation) on Kubernetes clusters:
//! - Enable, upgrade and disable tools with immediate in-progress status
//! - Background install/upgrade/uninstall with terminal status writes
//! - At most one in-flight operation per (cluster, tool)
//! - Status reconciliation from live Deployments and StatefulSets
//! - Node port lookup for tool UIs
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────────────────────────────┐
//!   API calls     →  │        ToolLifecycleManager          │
//!                    │  ┌──────────┐  ┌──────────────────┐  │
//!                    │  │  Leases  │  │ BackgroundTasks  │──┼──→ Installer
//!                    │  └──────────┘  └──────────────────┘  │
//!                    │  ┌──────────┐  ┌──────────────────┐  │
//!                    │  │Reconcile │←─│  ClusterProbe    │←─┼──── ClusterClient
//!                    │  └──────────┘  └──────────────────┘  │
//!                    └───────┬──────────────────┬───────────┘
//!                            ↓                  ↓
//!                     ToolRecordStore    ToolDetailCatalog
//! ```
//!
//! Every external system sits behind a trait; in-memory implementations
//! ship for development and tests.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod cluster;
pub mod installer;
pub mod lifecycle;
pub mod store;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use lifecycle::{StatusSyncService, ToolLifecycleManager};
pub use types::{Config, Error, Result};
