//! QNode - query router of a sharded, versioned SQL serving cluster
//!
//! Tracks which DNodes are alive, which version of every tablespace is being
//! served, and routes queries to the DNodes owning the partitions they touch.
//!
//! # Features
//! - DNode membership mirrored from the coordination store
//! - Versions being served merged across routers with compare-and-swap
//! - Key and key-range routing through partition maps
//! - Deployment status, rollback, cancellation and old version cleanup
//!
//! # Usage Example
//! ```ignore
//! use qnode::{QNode, QNodeConfig, coord::CoordinationStructures};
//!
//! let config = QNodeConfig::default();
//! let qnode = QNode::init(config, CoordinationStructures::in_memory(), factory).await?;
//! let status = qnode.query("users", Some("alice"), Some("SELECT 1"), None).await;
//! ```

pub mod api;
pub mod balance;
pub mod catalogue;
pub mod config;
pub mod coord;
pub mod deployments;
pub mod error;
pub mod membership;
pub mod querier;
pub mod router;
pub mod shard;
pub mod storage;
pub mod versions;
pub mod warmup;

pub use config::QNodeConfig;
pub use error::{QNodeError, Result};

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use qnode_core::{
    DNodeSystemStatus, DeployInfo, DeployRequest, DeploymentsStatus, PartitionId, QNodeStatus,
    QueryStatus, StatusMessage, SwitchVersionRequest, Tablespace, TablespaceVersion,
};

use balance::BalanceCheck;
use catalogue::TablespaceCatalogue;
use coord::CoordinationStructures;
use deployments::{Deployer, DeploymentLifecycleTracker, PanelDeployer};
use membership::MembershipTracker;
use querier::{Querier, ShardQuerier};
use router::{MetricsSnapshot, QueryRouter};
use shard::{ShardClientFactory, ShardClientPool};
use storage::TablespaceVersionStore;
use versions::VersionCoordinator;
use warmup::WarmupGate;

/// Replaceable collaborators of a router
///
/// Unset ones get the defaults: `ShardQuerier` and `PanelDeployer`.
#[derive(Default)]
pub struct Collaborators {
    pub deployer: Option<Arc<dyn Deployer>>,
    pub querier: Option<Arc<dyn Querier>>,
}

/// Query router
pub struct QNode {
    config: QNodeConfig,
    coord: CoordinationStructures,
    catalogue: Arc<TablespaceCatalogue>,
    pool: Arc<ShardClientPool>,
    versions: Arc<VersionCoordinator>,
    membership: Arc<MembershipTracker>,
    router: QueryRouter,
    deployments: DeploymentLifecycleTracker,
    warmup: Arc<WarmupGate>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl QNode {
    /// Create a router with the default collaborators
    pub async fn init(
        config: QNodeConfig,
        coord: CoordinationStructures,
        shard_factory: Arc<dyn ShardClientFactory>,
    ) -> Result<Self> {
        Self::init_with(config, coord, shard_factory, Collaborators::default()).await
    }

    /// Create a router, join the cluster state and start the warmup timer
    pub async fn init_with(
        config: QNodeConfig,
        coord: CoordinationStructures,
        shard_factory: Arc<dyn ShardClientFactory>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        info!("Initializing QNode {}...", config.qnode.address);

        let warmup = Arc::new(WarmupGate::start(config.qnode.warming_time()));
        let catalogue = Arc::new(TablespaceCatalogue::new());
        let pool = Arc::new(ShardClientPool::new(
            shard_factory,
            config.shard_client.pool_size,
        ));
        let store = config
            .persistence
            .enabled_folder()
            .map(TablespaceVersionStore::new);
        let versions = Arc::new(VersionCoordinator::new(
            coord.clone(),
            store,
            catalogue.clone(),
            pool.clone(),
            config.qnode.versions_per_tablespace,
        ));
        let balance = Arc::new(BalanceCheck::new(
            warmup.clone(),
            catalogue.clone(),
            versions.clone(),
        ));
        let membership = Arc::new(MembershipTracker::new(
            coord.dnodes.clone(),
            pool.clone(),
            catalogue.clone(),
            balance,
        ));

        let mut listeners = Vec::with_capacity(2);
        listeners.push(membership.start().await?);
        listeners.push(versions.start().await?);

        let querier: Arc<dyn Querier> = match collaborators.querier {
            Some(querier) => querier,
            None => Arc::new(ShardQuerier::new(
                versions.clone(),
                catalogue.clone(),
                pool.clone(),
            )),
        };
        let deployer: Arc<dyn Deployer> = match collaborators.deployer {
            Some(deployer) => deployer,
            None => Arc::new(PanelDeployer::new(
                coord.clone(),
                config.qnode.address.clone(),
            )),
        };

        let router = QueryRouter::new(versions.clone(), catalogue.clone(), querier);
        let deployments = DeploymentLifecycleTracker::new(coord.clone(), deployer, versions.clone());

        info!("QNode {} initialized", config.qnode.address);
        Ok(Self {
            config,
            coord,
            catalogue,
            pool,
            versions,
            membership,
            router,
            deployments,
            warmup,
            listeners: Mutex::new(listeners),
        })
    }

    pub fn config(&self) -> &QNodeConfig {
        &self.config
    }

    pub fn coord(&self) -> &CoordinationStructures {
        &self.coord
    }

    pub fn catalogue(&self) -> &Arc<TablespaceCatalogue> {
        &self.catalogue
    }

    pub fn pool(&self) -> &Arc<ShardClientPool> {
        &self.pool
    }

    pub fn versions(&self) -> &Arc<VersionCoordinator> {
        &self.versions
    }

    pub fn is_warming(&self) -> bool {
        self.warmup.is_warming()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.router.metrics().snapshot()
    }

    pub async fn query(
        &self,
        tablespace: &str,
        key: Option<&str>,
        sql: Option<&str>,
        partition: Option<PartitionId>,
    ) -> QueryStatus {
        self.router.query(tablespace, key, sql, partition).await
    }

    pub async fn multi_query(
        &self,
        tablespace: &str,
        key_mins: &[Option<String>],
        key_maxs: &[Option<String>],
        sql: Option<&str>,
    ) -> Vec<QueryStatus> {
        self.router
            .multi_query(tablespace, key_mins, key_maxs, sql)
            .await
    }

    pub async fn deploy(&self, requests: &[DeployRequest]) -> DeployInfo {
        self.deployments.deploy(requests).await
    }

    pub async fn rollback(&self, requests: &[SwitchVersionRequest]) -> StatusMessage {
        self.deployments.rollback(requests).await
    }

    pub async fn cancel_deployment(&self, version: &str) -> StatusMessage {
        self.deployments.cancel_deployment(version).await
    }

    pub async fn clean_old_versions(&self) -> StatusMessage {
        match self.deployments.clean_old_versions().await {
            Ok(status) => status,
            Err(e) => {
                warn!("Cleaning old versions failed: {}", e);
                StatusMessage::error(e.to_string())
            }
        }
    }

    pub async fn deployments_status(&self) -> Result<DeploymentsStatus> {
        self.deployments.deployments_status().await
    }

    /// Cluster size, status of every registered DNode and served tablespaces
    pub async fn overview(&self) -> Result<QNodeStatus> {
        let mut dnodes = HashMap::new();
        for (_, info) in self.coord.dnodes.entries().await? {
            let status = self.dnode_status(&info.address).await;
            dnodes.insert(info.address, status);
        }

        let catalogue = self.catalogue.snapshot();
        let tablespace_map = self
            .versions
            .current()
            .iter()
            .filter_map(|(tablespace, version)| {
                catalogue
                    .get(&TablespaceVersion::new(tablespace.clone(), *version))
                    .map(|t| (tablespace.clone(), t.clone()))
            })
            .collect();

        Ok(QNodeStatus {
            cluster_size: self.coord.cluster.member_count(),
            dnodes,
            tablespace_map,
        })
    }

    pub fn tablespaces(&self) -> BTreeSet<String> {
        self.versions.tablespaces()
    }

    /// Metadata of the version of `name` being served
    pub fn tablespace(&self, name: &str) -> Option<Tablespace> {
        let version = self.versions.version_of(name)?;
        self.catalogue.get(&TablespaceVersion::new(name, version))
    }

    pub fn all_tablespace_versions(&self, name: &str) -> BTreeMap<u64, Tablespace> {
        self.catalogue.versions_of(name)
    }

    /// Remote status of a DNode, `Unreachable` when it cannot be asked
    pub async fn dnode_status(&self, address: &str) -> DNodeSystemStatus {
        match self
            .pool
            .call(address, |client| async move { client.status().await })
            .await
        {
            Ok(status) => status,
            Err(e) => {
                warn!("DNode {} unreachable: {}", address, e);
                DNodeSystemStatus::unreachable()
            }
        }
    }

    pub fn dnode_list(&self) -> Vec<String> {
        self.membership.dnode_list()
    }

    /// Stop listening to the coordination store and interrupt the warmup
    pub async fn close(&self) {
        let listeners: Vec<_> = self.listeners.lock().drain(..).collect();
        for listener in listeners {
            listener.abort();
        }
        self.warmup.close().await;
        info!("QNode {} closed", self.config.qnode.address);
    }
}
