//! Replication balance check run on DNode membership changes

use std::sync::Arc;
use tracing::{debug, warn};

use qnode_core::{PartitionId, TablespaceVersion};

use crate::catalogue::TablespaceCatalogue;
use crate::versions::VersionCoordinator;
use crate::warmup::WarmupGate;

/// Partition of a served version with fewer replicas than advertised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnderReplicated {
    pub tablespace: TablespaceVersion,
    pub partition: PartitionId,
    pub replicas: usize,
    pub expected: usize,
}

pub struct BalanceCheck {
    warmup: Arc<WarmupGate>,
    catalogue: Arc<TablespaceCatalogue>,
    versions: Arc<VersionCoordinator>,
}

impl BalanceCheck {
    pub fn new(
        warmup: Arc<WarmupGate>,
        catalogue: Arc<TablespaceCatalogue>,
        versions: Arc<VersionCoordinator>,
    ) -> Self {
        Self {
            warmup,
            catalogue,
            versions,
        }
    }

    /// Report under-replicated partitions of the versions being served
    ///
    /// Skipped while warming: the cluster view is still incomplete then.
    pub fn maybe_balance(&self) -> Vec<UnderReplicated> {
        if self.warmup.is_warming() {
            debug!("Still warming up, skipping balance check");
            return Vec::new();
        }

        let catalogue = self.catalogue.snapshot();
        let mut report = Vec::new();
        for (tablespace, version) in self.versions.current().iter() {
            let tv = TablespaceVersion::new(tablespace.clone(), *version);
            let Some(metadata) = catalogue.get(&tv) else {
                continue;
            };
            for entry in metadata.replication_map.entries() {
                if entry.is_under_replicated() {
                    warn!(
                        "Partition {} of {} has {} of {} replicas",
                        entry.shard,
                        tv,
                        entry.nodes.len(),
                        entry.expected_replicas
                    );
                    report.push(UnderReplicated {
                        tablespace: tv.clone(),
                        partition: entry.shard,
                        replicas: entry.nodes.len(),
                        expected: entry.expected_replicas,
                    });
                }
            }
        }
        report
    }
}
