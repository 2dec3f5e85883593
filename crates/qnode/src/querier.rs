//! Query execution against shards

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use qnode_core::{PartitionId, QueryStatus, Tablespace, TablespaceVersion, NO_PARTITION};

use crate::catalogue::TablespaceCatalogue;
use crate::shard::ShardClientPool;
use crate::versions::VersionCoordinator;

/// Runs one query against the shard owning a partition
///
/// Every outcome, including failures, is a `QueryStatus`.
#[async_trait]
pub trait Querier: Send + Sync {
    /// Route by key, or by an explicit partition when one is given
    async fn query(
        &self,
        tablespace: &str,
        key: Option<&str>,
        sql: &str,
        partition: Option<PartitionId>,
    ) -> QueryStatus;

    /// Run against one partition of an exact tablespace version
    async fn query_partition(
        &self,
        tablespace: &str,
        version: u64,
        sql: &str,
        partition: PartitionId,
    ) -> QueryStatus;
}

/// Default querier: catalogue lookup, then the shard pool
///
/// Replicas of a partition are tried round-robin; a replica failing at the
/// transport level hands over to the next one.
pub struct ShardQuerier {
    versions: Arc<VersionCoordinator>,
    catalogue: Arc<TablespaceCatalogue>,
    pool: Arc<ShardClientPool>,
    next_replica: AtomicUsize,
}

impl ShardQuerier {
    pub fn new(
        versions: Arc<VersionCoordinator>,
        catalogue: Arc<TablespaceCatalogue>,
        pool: Arc<ShardClientPool>,
    ) -> Self {
        Self {
            versions,
            catalogue,
            pool,
            next_replica: AtomicUsize::new(0),
        }
    }

    fn resolve(&self, tablespace: &str) -> Result<(u64, Tablespace), QueryStatus> {
        let version = self.versions.version_of(tablespace).ok_or_else(|| {
            QueryStatus::error(format!("No available version for tablespace {}", tablespace))
        })?;
        Ok((version, self.metadata_at(tablespace, version)?))
    }

    fn metadata_at(&self, tablespace: &str, version: u64) -> Result<Tablespace, QueryStatus> {
        self.catalogue
            .get(&TablespaceVersion::new(tablespace, version))
            .ok_or_else(|| {
                QueryStatus::error(format!(
                    "No available information for tablespace version {},{}",
                    tablespace, version
                ))
            })
    }

    async fn execute(
        &self,
        tablespace: &str,
        version: u64,
        metadata: &Tablespace,
        partition: PartitionId,
        sql: &str,
    ) -> QueryStatus {
        let replicas = match metadata.replication_map.nodes_for(partition) {
            Some(nodes) if !nodes.is_empty() => nodes,
            _ => {
                return QueryStatus::error(format!(
                    "No available DNode serving partition {} of tablespace version {},{}",
                    partition, tablespace, version
                ))
            }
        };

        let start = self.next_replica.fetch_add(1, Ordering::Relaxed);
        let mut last_error = String::new();
        for i in 0..replicas.len() {
            let dnode = &replicas[(start + i) % replicas.len()];
            let started = Instant::now();
            let result = self
                .pool
                .call(dnode, |client| async move {
                    client.sql(tablespace, version, partition, sql).await
                })
                .await;
            match result {
                Ok(rows) => {
                    let millis = started.elapsed().as_millis() as u64;
                    debug!(
                        "Partition {} of {}:{} answered by {} in {}ms",
                        partition, tablespace, version, dnode, millis
                    );
                    return QueryStatus::Ok {
                        shard: partition,
                        rows,
                        millis,
                    };
                }
                Err(e) if e.is_transport() => {
                    warn!("DNode {} failed, trying next replica: {}", dnode, e);
                    last_error = e.to_string();
                }
                Err(e) => return QueryStatus::error(e.to_string()),
            }
        }
        QueryStatus::error(format!(
            "All DNodes serving partition {} of tablespace version {},{} failed. Last error: {}",
            partition, tablespace, version, last_error
        ))
    }
}

#[async_trait]
impl Querier for ShardQuerier {
    async fn query(
        &self,
        tablespace: &str,
        key: Option<&str>,
        sql: &str,
        partition: Option<PartitionId>,
    ) -> QueryStatus {
        let (version, metadata) = match self.resolve(tablespace) {
            Ok(resolved) => resolved,
            Err(status) => return status,
        };
        let requested = partition.unwrap_or(NO_PARTITION);
        let Some(partition) = metadata.partition_map.route(key, requested) else {
            return QueryStatus::error(format!(
                "Key out of partition ranges: {} for tablespace {}",
                key.unwrap_or_default(),
                tablespace
            ));
        };
        self.execute(tablespace, version, &metadata, partition, sql)
            .await
    }

    async fn query_partition(
        &self,
        tablespace: &str,
        version: u64,
        sql: &str,
        partition: PartitionId,
    ) -> QueryStatus {
        let metadata = match self.metadata_at(tablespace, version) {
            Ok(metadata) => metadata,
            Err(status) => return status,
        };
        self.execute(tablespace, version, &metadata, partition, sql)
            .await
    }
}
