use std::fmt;
use std::sync::Arc;

use crate::config::{ClusterConfig, Config};
use crate::connector::Connector;
use crate::images::ImageResolver;
use crate::inventory::Inventory;

/// Read-only handle shared by every module, prepare and action of a run.
///
/// Cloning is cheap; all state lives behind `Arc`s.
#[derive(Clone)]
pub struct Runtime {
    inventory: Arc<Inventory>,
    connector: Arc<dyn Connector>,
    cluster: Arc<ClusterConfig>,
}

impl Runtime {
    pub fn new(inventory: Inventory, connector: Arc<dyn Connector>, cluster: ClusterConfig) -> Self {
        Self {
            inventory: Arc::new(inventory),
            connector,
            cluster: Arc::new(cluster),
        }
    }

    pub fn from_config(config: &Config, connector: Arc<dyn Connector>) -> Self {
        Self::new(config.inventory(), connector, config.cluster.clone())
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    pub fn images(&self) -> ImageResolver {
        ImageResolver::new(self.cluster.registry.clone())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("hosts", &self.inventory.hosts().len())
            .field("connector", &self.connector.name())
            .finish()
    }
}
