//! Tablespace catalogue
//!
//! Maps every known tablespace version to its partition map and shard
//! placement, rebuilt from the serving info DNodes advertise when they join,
//! update or leave.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use qnode_core::{DNodeInfo, PartitionEntry, Tablespace, TablespaceVersion};

/// Kind of registry change a DNode went through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DNodeEvent {
    Entry,
    Update,
    Leave,
}

pub type CatalogueSnapshot = Arc<HashMap<TablespaceVersion, Tablespace>>;

/// Copy-on-write catalogue of tablespace versions
///
/// Readers take a snapshot and never observe a half-applied DNode event.
#[derive(Default)]
pub struct TablespaceCatalogue {
    versions: RwLock<CatalogueSnapshot>,
}

impl TablespaceCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CatalogueSnapshot {
        self.versions.read().clone()
    }

    pub fn get(&self, version: &TablespaceVersion) -> Option<Tablespace> {
        self.versions.read().get(version).cloned()
    }

    pub fn contains(&self, version: &TablespaceVersion) -> bool {
        self.versions.read().contains_key(version)
    }

    /// All catalogued versions of one tablespace
    pub fn versions_of(&self, tablespace: &str) -> BTreeMap<u64, Tablespace> {
        self.versions
            .read()
            .iter()
            .filter(|(tv, _)| tv.tablespace == tablespace)
            .map(|(tv, t)| (tv.version, t.clone()))
            .collect()
    }

    /// Catalogued version numbers grouped by tablespace
    pub fn versions_by_tablespace(&self) -> BTreeMap<String, BTreeSet<u64>> {
        let mut grouped: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
        for tv in self.versions.read().keys() {
            grouped
                .entry(tv.tablespace.clone())
                .or_default()
                .insert(tv.version);
        }
        grouped
    }

    /// Apply a DNode registry change
    pub fn update_from_dnode(&self, info: &DNodeInfo, event: DNodeEvent) {
        let mut guard = self.versions.write();
        let mut next = HashMap::clone(&guard);
        match event {
            DNodeEvent::Entry => add_dnode(&mut next, info),
            DNodeEvent::Update => {
                remove_dnode(&mut next, &info.address);
                add_dnode(&mut next, info);
            }
            DNodeEvent::Leave => remove_dnode(&mut next, &info.address),
        }
        debug!(
            "Catalogue after {:?} of {}: {} tablespace versions",
            event,
            info.address,
            next.len()
        );
        *guard = Arc::new(next);
    }

    /// Drop versions from the catalogue, returning what was removed
    pub fn remove(&self, versions: &[TablespaceVersion]) -> Vec<(TablespaceVersion, Tablespace)> {
        if versions.is_empty() {
            return Vec::new();
        }
        let mut guard = self.versions.write();
        let mut next = HashMap::clone(&guard);
        let removed = versions
            .iter()
            .filter_map(|tv| next.remove(tv).map(|t| (tv.clone(), t)))
            .collect();
        *guard = Arc::new(next);
        removed
    }
}

fn add_dnode(versions: &mut HashMap<TablespaceVersion, Tablespace>, info: &DNodeInfo) {
    for (tablespace, served) in &info.serving_info {
        for (version, partitions) in served {
            let entry = versions
                .entry(TablespaceVersion::new(tablespace.clone(), *version))
                .or_insert_with(|| Tablespace::new(*version));
            for (partition, meta) in partitions {
                entry.partition_map.upsert(PartitionEntry::new(
                    *partition,
                    meta.min_key.as_deref(),
                    meta.max_key.as_deref(),
                ));
                entry
                    .replication_map
                    .add_node(*partition, &info.address, meta.n_replicas);
                entry.creation_date = entry.creation_date.max(meta.deployment_date);
            }
        }
    }
}

fn remove_dnode(versions: &mut HashMap<TablespaceVersion, Tablespace>, address: &str) {
    versions.retain(|_, tablespace| {
        for orphaned in tablespace.replication_map.remove_node(address) {
            tablespace.partition_map.remove_partition(orphaned);
        }
        !tablespace.replication_map.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnode_core::PartitionMetadata;

    fn meta(min: Option<&str>, max: Option<&str>, replicas: usize) -> PartitionMetadata {
        PartitionMetadata {
            min_key: min.map(str::to_string),
            max_key: max.map(str::to_string),
            n_replicas: replicas,
            deployment_date: 1_000,
        }
    }

    fn dnode_a() -> DNodeInfo {
        DNodeInfo::new("dnode-a")
            .with_partition("users", 3, 0, meta(None, Some("m"), 2))
            .with_partition("users", 3, 1, meta(Some("m"), None, 2))
    }

    fn dnode_b() -> DNodeInfo {
        DNodeInfo::new("dnode-b").with_partition("users", 3, 0, meta(None, Some("m"), 2))
    }

    #[test]
    fn test_entry_builds_partition_and_replication_maps() {
        let catalogue = TablespaceCatalogue::new();
        catalogue.update_from_dnode(&dnode_a(), DNodeEvent::Entry);
        catalogue.update_from_dnode(&dnode_b(), DNodeEvent::Entry);

        let users = catalogue.get(&TablespaceVersion::new("users", 3)).unwrap();
        assert_eq!(users.partition_map.all_partitions(), vec![0, 1]);
        assert_eq!(users.partition_map.find_partition("z"), Some(1));
        assert_eq!(users.replication_map.nodes_for(0).unwrap().len(), 2);
        assert_eq!(users.creation_date, 1_000);
    }

    #[test]
    fn test_leave_drops_orphaned_partitions_and_versions() {
        let catalogue = TablespaceCatalogue::new();
        catalogue.update_from_dnode(&dnode_a(), DNodeEvent::Entry);
        catalogue.update_from_dnode(&dnode_b(), DNodeEvent::Entry);

        catalogue.update_from_dnode(&dnode_a(), DNodeEvent::Leave);
        let users = catalogue.get(&TablespaceVersion::new("users", 3)).unwrap();
        assert_eq!(users.partition_map.all_partitions(), vec![0]);
        assert_eq!(
            users.replication_map.nodes_for(0),
            Some(&["dnode-b".to_string()][..])
        );

        catalogue.update_from_dnode(&dnode_b(), DNodeEvent::Leave);
        assert!(!catalogue.contains(&TablespaceVersion::new("users", 3)));
    }

    #[test]
    fn test_update_forgets_versions_no_longer_served() {
        let catalogue = TablespaceCatalogue::new();
        catalogue.update_from_dnode(&dnode_b(), DNodeEvent::Entry);

        let moved = DNodeInfo::new("dnode-b").with_partition("users", 4, 0, meta(None, None, 1));
        catalogue.update_from_dnode(&moved, DNodeEvent::Update);

        assert!(!catalogue.contains(&TablespaceVersion::new("users", 3)));
        assert_eq!(
            catalogue.versions_of("users").keys().copied().collect::<Vec<_>>(),
            vec![4]
        );
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_changes() {
        let catalogue = TablespaceCatalogue::new();
        catalogue.update_from_dnode(&dnode_a(), DNodeEvent::Entry);
        let before = catalogue.snapshot();

        let removed = catalogue.remove(&[TablespaceVersion::new("users", 3)]);
        assert_eq!(removed.len(), 1);
        assert_eq!(before.len(), 1);
        assert!(catalogue.snapshot().is_empty());
        assert!(catalogue.versions_by_tablespace().is_empty());
    }
}
