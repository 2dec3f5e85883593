//! Shard (DNode) descriptors
//!
//! What each data-serving shard publishes in the coordination store

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::partition::PartitionId;
use crate::tablespace::TablespaceVersion;

/// Status value reported for shards that could not be contacted
pub const UNREACHABLE: &str = "Unreachable";

/// Per-partition metadata a shard advertises for a version it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMetadata {
    /// Lower key bound (inclusive)
    pub min_key: Option<String>,
    /// Upper key bound (exclusive)
    pub max_key: Option<String>,
    /// Replica count requested at deploy time
    pub n_replicas: usize,
    /// Deployment date (millis since epoch)
    pub deployment_date: i64,
}

/// Serving info: tablespace -> version -> partition -> metadata
pub type ServingInfo = HashMap<String, HashMap<u64, HashMap<PartitionId, PartitionMetadata>>>;

/// Shard registration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DNodeInfo {
    /// RPC address (host:port), also the shard identity
    pub address: String,
    /// Everything this shard can serve
    #[serde(default)]
    pub serving_info: ServingInfo,
}

impl DNodeInfo {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            serving_info: HashMap::new(),
        }
    }

    /// Builder-style registration of one served partition
    pub fn with_partition(
        mut self,
        tablespace: &str,
        version: u64,
        partition: PartitionId,
        metadata: PartitionMetadata,
    ) -> Self {
        self.serving_info
            .entry(tablespace.to_string())
            .or_default()
            .entry(version)
            .or_default()
            .insert(partition, metadata);
        self
    }

    /// Every tablespace version this shard holds
    pub fn served_versions(&self) -> impl Iterator<Item = TablespaceVersion> + '_ {
        self.serving_info.iter().flat_map(|(tablespace, versions)| {
            versions
                .keys()
                .map(move |v| TablespaceVersion::new(tablespace.clone(), *v))
        })
    }
}

/// Remote status of a shard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DNodeSystemStatus {
    pub system_status: String,
    /// Free-form details returned by the shard
    #[serde(default, flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl DNodeSystemStatus {
    pub fn new(system_status: impl Into<String>) -> Self {
        Self {
            system_status: system_status.into(),
            details: serde_json::Map::new(),
        }
    }

    pub fn unreachable() -> Self {
        Self::new(UNREACHABLE)
    }

    pub fn is_unreachable(&self) -> bool {
        self.system_status == UNREACHABLE
    }
}
