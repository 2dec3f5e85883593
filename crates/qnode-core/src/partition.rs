//! Partition maps
//!
//! Maps key ranges to partition ids for one tablespace version:
//! - Key -> partition id (binary search over sorted ranges)
//! - Key range -> every partition overlapping it

use serde::{Deserialize, Serialize};

/// Partition id type
pub type PartitionId = i32;

/// Sentinel partition id: no fixed partition, the router decides from the key
pub const NO_PARTITION: PartitionId = -1;

/// One key range of a partition map
///
/// Covers `[min, max)`. A `None` bound is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    /// Partition id
    pub shard: PartitionId,
    /// Lower bound (inclusive)
    pub min: Option<String>,
    /// Upper bound (exclusive)
    pub max: Option<String>,
}

impl PartitionEntry {
    /// Create a new PartitionEntry
    pub fn new(shard: PartitionId, min: Option<&str>, max: Option<&str>) -> Self {
        Self {
            shard,
            min: min.map(str::to_string),
            max: max.map(str::to_string),
        }
    }

    /// Check if a key falls inside this entry
    pub fn contains_key(&self, key: &str) -> bool {
        self.min.as_deref().map_or(true, |min| key >= min)
            && self.max.as_deref().map_or(true, |max| key < max)
    }

    /// Check if this entry overlaps `[min, max)`
    pub fn overlaps(&self, min: Option<&str>, max: Option<&str>) -> bool {
        let starts_before_end = match (self.min.as_deref(), max) {
            (Some(own_min), Some(max)) => own_min < max,
            _ => true,
        };
        let ends_after_start = match (self.max.as_deref(), min) {
            (Some(own_max), Some(min)) => own_max > min,
            _ => true,
        };
        starts_before_end && ends_after_start
    }
}

/// Ordered key-range -> partition id index
///
/// Entries are kept sorted by lower bound (unbounded first) so point lookups
/// are a binary search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMap {
    entries: Vec<PartitionEntry>,
}

impl PartitionMap {
    /// Create a partition map from unordered entries
    pub fn new(mut entries: Vec<PartitionEntry>) -> Self {
        entries.sort_by(|a, b| a.min.cmp(&b.min).then(a.shard.cmp(&b.shard)));
        Self { entries }
    }

    /// Sorted entries
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    /// Number of partitions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add or replace the entry for `entry.shard`
    pub fn upsert(&mut self, entry: PartitionEntry) {
        self.entries.retain(|e| e.shard != entry.shard);
        let idx = self
            .entries
            .partition_point(|e| (&e.min, e.shard) <= (&entry.min, entry.shard));
        self.entries.insert(idx, entry);
    }

    /// Drop the entry of `shard`, returning whether it existed
    pub fn remove_partition(&mut self, shard: PartitionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.shard != shard);
        self.entries.len() != before
    }

    /// Check if a partition id is mapped
    pub fn contains_partition(&self, shard: PartitionId) -> bool {
        self.entries.iter().any(|e| e.shard == shard)
    }

    /// Find the partition owning a key
    ///
    /// Binary search for the last entry whose lower bound is `<= key`, then
    /// check its upper bound.
    pub fn find_partition(&self, key: &str) -> Option<PartitionId> {
        let idx = self
            .entries
            .partition_point(|e| e.min.as_deref().map_or(true, |min| min <= key));
        if idx == 0 {
            return None;
        }
        let candidate = &self.entries[idx - 1];
        candidate.contains_key(key).then_some(candidate.shard)
    }

    /// Find every partition overlapping `[min, max)`
    ///
    /// Both bounds `None` returns all partitions. A range with `min == max`
    /// is treated as the single key `min`; an inverted range matches nothing.
    pub fn find_partitions(&self, min: Option<&str>, max: Option<&str>) -> Vec<PartitionId> {
        match (min, max) {
            (None, None) => self.all_partitions(),
            (Some(min), Some(max)) if min == max => self.find_partition(min).into_iter().collect(),
            (Some(min), Some(max)) if min > max => Vec::new(),
            _ => self
                .entries
                .iter()
                .filter(|e| e.overlaps(min, max))
                .map(|e| e.shard)
                .collect(),
        }
    }

    /// All partition ids in key order
    pub fn all_partitions(&self) -> Vec<PartitionId> {
        self.entries.iter().map(|e| e.shard).collect()
    }

    /// Resolve the partition for a request
    ///
    /// An explicit partition wins; `NO_PARTITION` defers to a key lookup.
    pub fn route(&self, key: Option<&str>, requested: PartitionId) -> Option<PartitionId> {
        if requested != NO_PARTITION {
            return Some(requested);
        }
        key.and_then(|k| self.find_partition(k))
    }
}
