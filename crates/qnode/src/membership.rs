//! DNode membership tracking
//!
//! Mirrors the DNode registry of the coordination store. Removal events of
//! the registry carry no value, so the mirror is what tells a leave handler
//! which address just went away.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use qnode_core::DNodeInfo;

use crate::balance::BalanceCheck;
use crate::catalogue::{DNodeEvent, TablespaceCatalogue};
use crate::coord::{MapEvent, ReplicatedMap};
use crate::error::{QNodeError, Result};
use crate::shard::ShardClientPool;

pub struct MembershipTracker {
    dnodes: Arc<dyn ReplicatedMap<String, DNodeInfo>>,
    mirror: RwLock<HashMap<String, DNodeInfo>>,
    pool: Arc<ShardClientPool>,
    catalogue: Arc<TablespaceCatalogue>,
    balance: Arc<BalanceCheck>,
}

impl MembershipTracker {
    pub fn new(
        dnodes: Arc<dyn ReplicatedMap<String, DNodeInfo>>,
        pool: Arc<ShardClientPool>,
        catalogue: Arc<TablespaceCatalogue>,
        balance: Arc<BalanceCheck>,
    ) -> Self {
        Self {
            dnodes,
            mirror: RwLock::new(HashMap::new()),
            pool,
            catalogue,
            balance,
        }
    }

    /// Replay the registry and follow its changes
    ///
    /// Subscribes before enumerating: a DNode joining in between shows up in
    /// both, and the join handler ignores the second sighting.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut events = self.dnodes.subscribe();

        let existing = self.dnodes.entries().await?;
        let mut alive = Vec::with_capacity(existing.len());
        for (dnode_ref, info) in existing {
            alive.push(info.address.clone());
            self.on_join(dnode_ref, info);
        }
        info!("Alive DNodes at QNode startup [{}]", alive.join(", "));
        info!(
            "TablespaceVersion map at QNode startup: {:?}",
            self.catalogue.versions_by_tablespace()
        );

        let this = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = this.handle_event(event) {
                    error!("Failed to apply DNode registry event: {}", e);
                }
            }
            debug!("DNode registry listener stopped");
        }))
    }

    pub fn handle_event(&self, event: MapEvent<String, DNodeInfo>) -> Result<()> {
        match event {
            MapEvent::Added { key, value } => {
                self.on_join(key, value);
            }
            MapEvent::Updated { key, value } => self.on_update(key, value),
            MapEvent::Removed { key } => self.on_leave(&key)?,
            MapEvent::Evicted { key } => {
                warn!("Ignoring eviction of DNode {} from the registry", key);
            }
            MapEvent::Cleared => warn!("Ignoring clear of the DNode registry"),
        }
        Ok(())
    }

    /// Returns false when the mirror already held exactly this registration
    fn on_join(&self, dnode_ref: String, info: DNodeInfo) -> bool {
        let previous = {
            let mut mirror = self.mirror.write();
            if mirror.get(&dnode_ref) == Some(&info) {
                debug!("DNode {} already known, ignoring repeated join", info.address);
                return false;
            }
            mirror.insert(dnode_ref, info.clone())
        };

        info!(
            "DNode [{}] joins the cluster as ready to serve requests",
            info.address
        );
        self.pool.initialize_for(&info.address);
        let event = if previous.is_some() {
            DNodeEvent::Update
        } else {
            DNodeEvent::Entry
        };
        self.catalogue.update_from_dnode(&info, event);
        self.balance.maybe_balance();
        true
    }

    fn on_leave(&self, dnode_ref: &str) -> Result<()> {
        let info = self
            .mirror
            .write()
            .remove(dnode_ref)
            .ok_or_else(|| QNodeError::UnknownDNode(dnode_ref.to_string()))?;

        info!("DNode [{}] left", info.address);
        self.pool.discard_for(&info.address);
        self.catalogue.update_from_dnode(&info, DNodeEvent::Leave);
        self.balance.maybe_balance();
        Ok(())
    }

    fn on_update(&self, dnode_ref: String, info: DNodeInfo) {
        debug!("DNode [{}] updated its serving info", info.address);
        self.mirror.write().insert(dnode_ref, info.clone());
        self.catalogue.update_from_dnode(&info, DNodeEvent::Update);
    }

    /// Addresses of the DNodes currently known
    pub fn dnode_list(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self
            .mirror
            .read()
            .values()
            .map(|info| info.address.clone())
            .collect();
        addresses.sort();
        addresses
    }

    pub fn dnode_info(&self, dnode_ref: &str) -> Option<DNodeInfo> {
        self.mirror.read().get(dnode_ref).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CoordinationStructures;
    use crate::shard::{ShardClient, ShardClientFactory, ShardRpcError};
    use crate::versions::VersionCoordinator;
    use crate::warmup::WarmupGate;
    use qnode_core::{PartitionMetadata, TablespaceVersion};
    use std::time::Duration;

    /// Membership never talks to shards
    struct OfflineFactory;

    impl ShardClientFactory for OfflineFactory {
        fn create(&self, address: &str) -> std::result::Result<Arc<dyn ShardClient>, ShardRpcError> {
            Err(ShardRpcError::NotConnected(address.to_string()))
        }
    }

    fn tracker(
        coord: &CoordinationStructures,
    ) -> (
        Arc<MembershipTracker>,
        Arc<TablespaceCatalogue>,
        Arc<ShardClientPool>,
    ) {
        let catalogue = Arc::new(TablespaceCatalogue::new());
        let pool = Arc::new(ShardClientPool::new(Arc::new(OfflineFactory), 2));
        let versions = Arc::new(VersionCoordinator::new(
            coord.clone(),
            None,
            catalogue.clone(),
            pool.clone(),
            10,
        ));
        let warmup = Arc::new(WarmupGate::start(Duration::ZERO));
        let balance = Arc::new(BalanceCheck::new(warmup, catalogue.clone(), versions));
        let membership = Arc::new(MembershipTracker::new(
            coord.dnodes.clone(),
            pool.clone(),
            catalogue.clone(),
            balance,
        ));
        (membership, catalogue, pool)
    }

    fn info(address: &str) -> DNodeInfo {
        DNodeInfo::new(address).with_partition(
            "users",
            1,
            0,
            PartitionMetadata {
                min_key: None,
                max_key: None,
                n_replicas: 2,
                deployment_date: 0,
            },
        )
    }

    #[tokio::test]
    async fn test_join_seen_by_replay_and_listener_is_applied_once() {
        let coord = CoordinationStructures::in_memory();
        coord.dnodes.put("dnode-a".into(), info("dnode-a")).await.unwrap();
        let (membership, catalogue, pool) = tracker(&coord);
        let listener = membership.start().await.unwrap();
        listener.abort();

        // The same join delivered again by the subscription
        membership
            .handle_event(MapEvent::Added {
                key: "dnode-a".into(),
                value: info("dnode-a"),
            })
            .unwrap();

        assert_eq!(membership.dnode_list(), vec!["dnode-a"]);
        assert!(pool.is_tracked("dnode-a"));
        let users = catalogue.get(&TablespaceVersion::new("users", 1)).unwrap();
        assert_eq!(users.replication_map.nodes_for(0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_startup_replay_fills_catalogue() {
        let coord = CoordinationStructures::in_memory();
        coord.dnodes.put("dnode-a".into(), info("dnode-a")).await.unwrap();
        let orders = DNodeInfo::new("dnode-b").with_partition(
            "orders",
            3,
            0,
            PartitionMetadata {
                min_key: None,
                max_key: None,
                n_replicas: 1,
                deployment_date: 0,
            },
        );
        coord.dnodes.put("dnode-b".into(), orders).await.unwrap();

        let (membership, catalogue, _) = tracker(&coord);
        let listener = membership.start().await.unwrap();
        listener.abort();

        let grouped = catalogue.versions_by_tablespace();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["users"].iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(grouped["orders"].iter().copied().collect::<Vec<_>>(), vec![3]);
    }

    #[tokio::test]
    async fn test_leave_of_unknown_dnode_is_an_error() {
        let coord = CoordinationStructures::in_memory();
        let (membership, _, _) = tracker(&coord);
        let err = membership
            .handle_event(MapEvent::Removed {
                key: "ghost".into(),
            })
            .unwrap_err();
        assert!(matches!(err, QNodeError::UnknownDNode(_)));
    }

    #[tokio::test]
    async fn test_leave_uses_mirrored_info() {
        let coord = CoordinationStructures::in_memory();
        let (membership, catalogue, pool) = tracker(&coord);
        membership
            .handle_event(MapEvent::Added {
                key: "ref-1".into(),
                value: info("dnode-a"),
            })
            .unwrap();
        assert!(membership.dnode_info("ref-1").is_some());

        membership
            .handle_event(MapEvent::Removed { key: "ref-1".into() })
            .unwrap();
        assert!(membership.dnode_list().is_empty());
        assert!(!pool.is_tracked("dnode-a"));
        assert!(catalogue.snapshot().is_empty());
    }
}
