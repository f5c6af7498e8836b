//! Shared test wiring for the lifecycle unit tests.

use async_trait::async_trait;
use std::sync::Arc;

use super::manager::{Collaborators, ToolLifecycleManager};
use crate::cluster::{ClusterEndpoint, InMemoryCluster, StaticClusterDirectory, StaticConnector};
use crate::installer::{Installer, InstallerContext, InstallerFactory};
use crate::store::InMemoryToolStore;
use crate::tools::{InMemoryToolCatalog, ToolDescriptorTable, ToolDetail};
use crate::types::{ClusterName, LifecycleConfig, Result};

pub(crate) struct NoopInstaller;

#[async_trait]
impl Installer for NoopInstaller {
    async fn install(&self, _detail: &ToolDetail) -> Result<()> {
        Ok(())
    }

    async fn upgrade(&self, _detail: &ToolDetail) -> Result<()> {
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) struct NoopFactory;

impl InstallerFactory for NoopFactory {
    fn build(&self, _context: InstallerContext) -> Result<Box<dyn Installer>> {
        Ok(Box::new(NoopInstaller))
    }
}

pub(crate) fn cluster_name() -> ClusterName {
    ClusterName::parse("prod").unwrap()
}

pub(crate) struct Fixture {
    pub manager: ToolLifecycleManager,
    pub store: Arc<InMemoryToolStore>,
    pub cluster: Arc<InMemoryCluster>,
}

/// One reachable cluster named `prod` with a grafana chart in the catalog.
pub(crate) fn fixture() -> Fixture {
    let store = Arc::new(InMemoryToolStore::new());
    let cluster = Arc::new(InMemoryCluster::new());
    let endpoint = ClusterEndpoint {
        name: cluster_name(),
        hosts: vec!["10.0.0.1:6443".to_string()],
        token: "token".to_string(),
        architecture: "amd64".to_string(),
    };
    let catalog =
        InMemoryToolCatalog::with_details([ToolDetail::new("grafana", "v8.3.1", "6.17.5")])
            .unwrap();

    let manager = ToolLifecycleManager::new(
        Collaborators {
            store: store.clone(),
            directory: Arc::new(StaticClusterDirectory::new([endpoint])),
            connector: Arc::new(
                StaticConnector::new().with_client(cluster_name(), cluster.clone()),
            ),
            catalog: Arc::new(catalog),
            installers: Arc::new(NoopFactory),
        },
        ToolDescriptorTable::builtin(),
        LifecycleConfig::default(),
    );

    Fixture {
        manager,
        store,
        cluster,
    }
}
