//! Tablespace and version definitions
//!
//! A tablespace is served as a sequence of immutable numbered versions; each
//! version carries its partition map and the shards replicating every partition.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::partition::{PartitionId, PartitionMap};

/// Tablespace name -> version number currently served
pub type VersionMap = HashMap<String, u64>;

/// (tablespace, version) pair identifying one immutable dataset snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TablespaceVersion {
    pub tablespace: String,
    pub version: u64,
}

impl TablespaceVersion {
    pub fn new(tablespace: impl Into<String>, version: u64) -> Self {
        Self {
            tablespace: tablespace.into(),
            version,
        }
    }
}

impl fmt::Display for TablespaceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tablespace, self.version)
    }
}

/// Shards holding one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEntry {
    /// Partition id
    pub shard: PartitionId,
    /// Shard addresses serving this partition
    pub nodes: Vec<String>,
    /// Replica count advertised by the shards at deploy time
    pub expected_replicas: usize,
}

impl ReplicationEntry {
    pub fn is_under_replicated(&self) -> bool {
        self.nodes.len() < self.expected_replicas
    }
}

/// Partition id -> shard addresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationMap {
    entries: Vec<ReplicationEntry>,
}

impl ReplicationMap {
    pub fn new(entries: Vec<ReplicationEntry>) -> Self {
        let mut map = Self { entries };
        map.entries.sort_by_key(|e| e.shard);
        map
    }

    pub fn entries(&self) -> &[ReplicationEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Shard addresses for a partition
    pub fn nodes_for(&self, shard: PartitionId) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|e| e.shard == shard)
            .map(|e| e.nodes.as_slice())
    }

    /// Register `node` as a replica of `shard`
    pub fn add_node(&mut self, shard: PartitionId, node: &str, expected_replicas: usize) {
        match self.entries.iter_mut().find(|e| e.shard == shard) {
            Some(entry) => {
                if !entry.nodes.iter().any(|n| n == node) {
                    entry.nodes.push(node.to_string());
                }
                entry.expected_replicas = entry.expected_replicas.max(expected_replicas);
            }
            None => {
                let idx = self.entries.partition_point(|e| e.shard < shard);
                self.entries.insert(
                    idx,
                    ReplicationEntry {
                        shard,
                        nodes: vec![node.to_string()],
                        expected_replicas,
                    },
                );
            }
        }
    }

    /// Remove `node` from every partition, dropping partitions left without shards
    ///
    /// Returns the partitions that lost their last shard.
    pub fn remove_node(&mut self, node: &str) -> Vec<PartitionId> {
        let mut orphaned = Vec::new();
        for entry in &mut self.entries {
            entry.nodes.retain(|n| n != node);
            if entry.nodes.is_empty() {
                orphaned.push(entry.shard);
            }
        }
        self.entries.retain(|e| !e.nodes.is_empty());
        orphaned
    }

    /// Every shard address appearing in the map
    pub fn all_nodes(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .flat_map(|e| e.nodes.iter().cloned())
            .collect()
    }
}

/// Metadata of one tablespace version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablespace {
    pub partition_map: PartitionMap,
    pub replication_map: ReplicationMap,
    pub version: u64,
    /// Deployment date reported by the shards (millis since epoch)
    pub creation_date: i64,
}

impl Tablespace {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            ..Default::default()
        }
    }
}
