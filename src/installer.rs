//! Installer adapter contract.
//!
//! An installer is built per lifecycle operation with everything it needs
//! (tool, cluster, namespaces, intent) and then driven once. Chart
//! rendering, manifest application and readiness waits are its own business.

use async_trait::async_trait;
use std::fmt;

use crate::cluster::ClusterEndpoint;
use crate::tools::{ToolDetail, ToolRecord};
use crate::types::Result;

/// Whether the installer is built to put a tool on the cluster or take it off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallIntent {
    /// Install or upgrade.
    Install,
    /// Uninstall.
    Remove,
}

impl fmt::Display for InstallIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallIntent::Install => f.write_str("install"),
            InstallIntent::Remove => f.write_str("remove"),
        }
    }
}

/// Construction-time parameters for an [`Installer`].
#[derive(Debug, Clone)]
pub struct InstallerContext {
    pub tool: ToolRecord,
    pub endpoint: ClusterEndpoint,
    /// Namespace the tool currently lives in (equal to `namespace` unless a
    /// re-enable moves it).
    pub previous_namespace: String,
    /// Namespace the operation targets.
    pub namespace: String,
    pub intent: InstallIntent,
}

impl InstallerContext {
    /// Enabling with a different namespace than the last install.
    pub fn is_migration(&self) -> bool {
        self.previous_namespace != self.namespace
    }
}

/// Performs the actual install/upgrade/uninstall for one tool instance.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, detail: &ToolDetail) -> Result<()>;

    async fn upgrade(&self, detail: &ToolDetail) -> Result<()>;

    async fn uninstall(&self) -> Result<()>;
}

/// Builds installers from a context. Fails fast on unusable contexts
/// (unsupported tool, bad credentials) before any status is written.
pub trait InstallerFactory: Send + Sync {
    fn build(&self, context: InstallerContext) -> Result<Box<dyn Installer>>;
}
