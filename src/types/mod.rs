//! Core types for the tool lifecycle manager.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed names (ClusterName, ToolName) and operation ids
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for lifecycle, sync and logging

mod config;
mod errors;
mod ids;

pub use config::{
    Config, LifecycleConfig, ObservabilityConfig, SyncConfig, DEFAULT_NAMESPACE,
};
pub use errors::{Error, Result};
pub use ids::{ClusterName, OperationId, ToolName};
