//! Shared coordination store
//!
//! The router consumes a replicated key/value service; this module fixes the
//! primitives it relies on and bundles the maps the router uses.

mod memory;

pub use memory::{LocalCluster, MemoryMap};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use qnode_core::{DNodeInfo, DeployInfo, DeployStatus, VersionMap};

/// Single key holding the cluster-wide versions being served
pub const KEY_FOR_VERSIONS_BEING_SERVED: &str = "versions_being_served";

/// Coordination store error
#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Change notification of a replicated map
///
/// `Removed` carries no value: the substrate does not retain the removed
/// entry, so listeners needing it must keep their own mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum MapEvent<K, V> {
    Added { key: K, value: V },
    Updated { key: K, value: V },
    Removed { key: K },
    /// Never emitted for the maps the router uses
    Evicted { key: K },
    /// Never emitted for the maps the router uses
    Cleared,
}

/// Replicated map primitives
#[async_trait]
pub trait ReplicatedMap<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, CoordError>;

    /// Unconditional write, returns the previous value
    async fn put(&self, key: K, value: V) -> Result<Option<V>, CoordError>;

    async fn remove(&self, key: &K) -> Result<Option<V>, CoordError>;

    /// Write `new` only if the current value equals `expected`
    ///
    /// `expected == None` means the key must be absent.
    async fn compare_and_swap(
        &self,
        key: K,
        expected: Option<V>,
        new: V,
    ) -> Result<bool, CoordError>;

    async fn entries(&self) -> Result<Vec<(K, V)>, CoordError>;

    /// Subscribe to changes; events are delivered in commit order
    fn subscribe(&self) -> mpsc::UnboundedReceiver<MapEvent<K, V>>;
}

/// Read-merge-CAS loop
///
/// Retries until the CAS succeeds; conflicts are never surfaced.
pub async fn update_with_retry<K, V, F>(
    map: &dyn ReplicatedMap<K, V>,
    key: &K,
    mut merge: F,
) -> Result<V, CoordError>
where
    K: Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
    F: FnMut(Option<&V>) -> V,
{
    let mut attempt = 0u64;
    loop {
        let current = map.get(key).await?;
        let next = merge(current.as_ref());
        if map.compare_and_swap(key.clone(), current, next.clone()).await? {
            return Ok(next);
        }
        attempt += 1;
        debug!("CAS conflict on {:?}, retrying (attempt {})", key, attempt);
        tokio::task::yield_now().await;
    }
}

/// View of the router cluster itself
pub trait ClusterView: Send + Sync {
    fn member_count(&self) -> usize;
}

/// Maps shared by every router
#[derive(Clone)]
pub struct CoordinationStructures {
    /// Shard registry: shard ref -> registration
    pub dnodes: Arc<dyn ReplicatedMap<String, DNodeInfo>>,
    /// Holds `KEY_FOR_VERSIONS_BEING_SERVED` -> tablespace versions
    pub versions_being_served: Arc<dyn ReplicatedMap<String, VersionMap>>,
    pub deployments_status_panel: Arc<dyn ReplicatedMap<u64, DeployStatus>>,
    pub deploy_info_panel: Arc<dyn ReplicatedMap<u64, DeployInfo>>,
    /// Free-text log lines per deployment
    pub deploy_log_panel: Arc<dyn ReplicatedMap<u64, Vec<String>>>,
    /// Timed progress lines per deployment, keyed by marker
    pub deploy_speed_panel: Arc<dyn ReplicatedMap<u64, BTreeMap<String, String>>>,
    pub cluster: Arc<dyn ClusterView>,
}

impl CoordinationStructures {
    /// Process-local structures for standalone mode and tests
    pub fn in_memory() -> Self {
        Self {
            dnodes: Arc::new(MemoryMap::new()),
            versions_being_served: Arc::new(MemoryMap::new()),
            deployments_status_panel: Arc::new(MemoryMap::new()),
            deploy_info_panel: Arc::new(MemoryMap::new()),
            deploy_log_panel: Arc::new(MemoryMap::new()),
            deploy_speed_panel: Arc::new(MemoryMap::new()),
            cluster: Arc::new(LocalCluster),
        }
    }

    /// Cluster-wide versions being served, if any router wrote them
    pub async fn copy_versions_being_served(&self) -> Result<Option<VersionMap>, CoordError> {
        self.versions_being_served
            .get(&KEY_FOR_VERSIONS_BEING_SERVED.to_string())
            .await
    }

    /// Append a free-text line to a deployment's log
    pub async fn log_deploy_message(&self, version: u64, line: String) -> Result<(), CoordError> {
        update_with_retry(self.deploy_log_panel.as_ref(), &version, |current| {
            let mut lines = current.cloned().unwrap_or_default();
            lines.push(line.clone());
            lines
        })
        .await
        .map(|_| ())
    }
}
