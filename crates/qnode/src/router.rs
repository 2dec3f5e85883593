//! Query routing
//!
//! Validates query requests and fans multi-queries out to the partitions
//! their key ranges touch. Only local mirrors are read on this path.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use qnode_core::{PartitionId, QueryStatus, TablespaceVersion};

use crate::catalogue::TablespaceCatalogue;
use crate::querier::Querier;
use crate::versions::VersionCoordinator;

/// Request counters
#[derive(Debug, Default)]
pub struct QueryMetrics {
    queries_served: AtomicU64,
    multi_queries_served: AtomicU64,
    rows_returned: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_served: u64,
    pub multi_queries_served: u64,
    pub rows_returned: u64,
}

impl QueryMetrics {
    fn record_result(&self, status: &QueryStatus) {
        if let Some(rows) = status.rows() {
            self.rows_returned
                .fetch_add(rows.len() as u64, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_served: self.queries_served.load(Ordering::Relaxed),
            multi_queries_served: self.multi_queries_served.load(Ordering::Relaxed),
            rows_returned: self.rows_returned.load(Ordering::Relaxed),
        }
    }
}

pub struct QueryRouter {
    versions: Arc<VersionCoordinator>,
    catalogue: Arc<TablespaceCatalogue>,
    querier: Arc<dyn Querier>,
    metrics: QueryMetrics,
}

impl QueryRouter {
    pub fn new(
        versions: Arc<VersionCoordinator>,
        catalogue: Arc<TablespaceCatalogue>,
        querier: Arc<dyn Querier>,
    ) -> Self {
        Self {
            versions,
            catalogue,
            querier,
            metrics: QueryMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    /// Query the single partition owning `key`, or an explicit `partition`
    ///
    /// Exactly one of `key` and `partition` must be given.
    pub async fn query(
        &self,
        tablespace: &str,
        key: Option<&str>,
        sql: Option<&str>,
        partition: Option<PartitionId>,
    ) -> QueryStatus {
        let sql = match check_sql(sql) {
            Ok(sql) => sql,
            Err(status) => return status,
        };
        match (key, partition) {
            (None, None) => {
                return QueryStatus::error(
                    "Null key / partition provided, can't query. Either partition or key must not be null.",
                )
            }
            (Some(_), Some(_)) => {
                return QueryStatus::error(
                    "(partition, key) parameters are mutually exclusive. Please use one or other, not both at the same time.",
                )
            }
            _ => {}
        }
        if self.versions.version_of(tablespace).is_none() {
            return QueryStatus::error(format!(
                "No available version for tablespace {}",
                tablespace
            ));
        }

        self.metrics.queries_served.fetch_add(1, Ordering::Relaxed);
        let result = self.querier.query(tablespace, key, sql, partition).await;
        self.metrics.record_result(&result);
        result
    }

    /// Query every partition overlapped by the `[min, max)` ranges
    ///
    /// One result per impacted partition, in partition order. No ranges
    /// means every partition.
    ///
    /// # Panics
    ///
    /// If `key_mins` and `key_maxs` differ in length.
    pub async fn multi_query(
        &self,
        tablespace: &str,
        key_mins: &[Option<String>],
        key_maxs: &[Option<String>],
        sql: Option<&str>,
    ) -> Vec<QueryStatus> {
        let sql = match check_sql(sql) {
            Ok(sql) => sql,
            Err(status) => return vec![status],
        };
        assert_eq!(
            key_mins.len(),
            key_maxs.len(),
            "Inconsistent parameters received for multi_query on {}: {:?}, {:?}",
            tablespace,
            key_mins,
            key_maxs
        );

        let Some(version) = self.versions.version_of(tablespace) else {
            return vec![QueryStatus::error(format!(
                "No available version for tablespace {}",
                tablespace
            ))];
        };
        // Known version without metadata happens while DNode info is still arriving
        let Some(metadata) = self
            .catalogue
            .get(&TablespaceVersion::new(tablespace, version))
        else {
            return vec![QueryStatus::error(format!(
                "No available information for tablespace version {},{}",
                tablespace, version
            ))];
        };

        let mut impacted: BTreeSet<PartitionId> = BTreeSet::new();
        if key_mins.is_empty() {
            impacted.extend(metadata.partition_map.all_partitions());
        }
        for (min, max) in key_mins.iter().zip(key_maxs) {
            impacted.extend(
                metadata
                    .partition_map
                    .find_partitions(min.as_deref(), max.as_deref()),
            );
        }

        let mut results = Vec::with_capacity(impacted.len());
        for partition in impacted {
            let result = self
                .querier
                .query_partition(tablespace, version, sql, partition)
                .await;
            self.metrics.record_result(&result);
            results.push(result);
        }
        self.metrics
            .multi_queries_served
            .fetch_add(1, Ordering::Relaxed);
        results
    }
}

fn check_sql(sql: Option<&str>) -> Result<&str, QueryStatus> {
    match sql {
        None => Err(QueryStatus::error("Null sql provided, can't query.")),
        Some("") => Err(QueryStatus::error("Empty sql provided, can't query.")),
        Some(sql) => Ok(sql),
    }
}
