#![allow(dead_code)]

pub mod mock_collaborators;
pub mod mock_shard;

use std::sync::Arc;
use std::time::Duration;

use qnode::coord::{update_with_retry, CoordinationStructures, KEY_FOR_VERSIONS_BEING_SERVED};
use qnode::{Collaborators, QNode, QNodeConfig};
use qnode_core::{DNodeInfo, PartitionId, PartitionMetadata};

use mock_collaborators::{RecordingDeployer, RecordingQuerier};
use mock_shard::{MockShardFactory, ShardScript};

/// Config with no warmup and the given retention count
pub fn test_config(versions_per_tablespace: usize) -> QNodeConfig {
    let mut config = QNodeConfig::default();
    config.qnode.address = "qnode-test:4412".to_string();
    config.qnode.warming_time_secs = 0;
    config.qnode.versions_per_tablespace = versions_per_tablespace;
    config.shard_client.pool_size = 4;
    config
}

/// DNode serving `(partition, min, max)` ranges of one tablespace version
pub fn dnode(
    address: &str,
    tablespace: &str,
    version: u64,
    partitions: &[(PartitionId, Option<&str>, Option<&str>)],
) -> DNodeInfo {
    let mut info = DNodeInfo::new(address);
    for (partition, min, max) in partitions {
        info = info.with_partition(
            tablespace,
            version,
            *partition,
            PartitionMetadata {
                min_key: min.map(str::to_string),
                max_key: max.map(str::to_string),
                n_replicas: 1,
                deployment_date: version as i64,
            },
        );
    }
    info
}

/// Four partitions split at "c", "g" and "n"
pub fn four_partitions(address: &str, tablespace: &str, version: u64) -> DNodeInfo {
    dnode(
        address,
        tablespace,
        version,
        &[
            (0, None, Some("c")),
            (1, Some("c"), Some("g")),
            (2, Some("g"), Some("n")),
            (3, Some("n"), None),
        ],
    )
}

pub async fn register(coord: &CoordinationStructures, info: DNodeInfo) {
    coord
        .dnodes
        .put(info.address.clone(), info)
        .await
        .unwrap();
}

/// Set served versions cluster-wide, as another router would
pub async fn serve(coord: &CoordinationStructures, versions: &[(&str, u64)]) {
    update_with_retry(
        coord.versions_being_served.as_ref(),
        &KEY_FOR_VERSIONS_BEING_SERVED.to_string(),
        |current| {
            let mut next = current.cloned().unwrap_or_default();
            for (tablespace, version) in versions {
                next.insert(tablespace.to_string(), *version);
            }
            next
        },
    )
    .await
    .unwrap();
}

/// Poll until `condition` holds; listeners apply events asynchronously
pub async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {}", what);
}

/// Let listeners drain the events raised while a router started
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Router backed by mock DNodes
pub async fn start_router(
    coord: &CoordinationStructures,
    versions_per_tablespace: usize,
) -> (QNode, Arc<ShardScript>) {
    let (factory, script) = MockShardFactory::new();
    let qnode = QNode::init(test_config(versions_per_tablespace), coord.clone(), factory)
        .await
        .unwrap();
    (qnode, script)
}

/// Router whose querier and deployer only record calls
pub async fn start_recording_router(
    coord: &CoordinationStructures,
) -> (QNode, Arc<RecordingQuerier>, Arc<RecordingDeployer>) {
    let (factory, _) = MockShardFactory::new();
    let querier = Arc::new(RecordingQuerier::default());
    let deployer = Arc::new(RecordingDeployer::default());
    let qnode = QNode::init_with(
        test_config(10),
        coord.clone(),
        factory,
        Collaborators {
            deployer: Some(deployer.clone()),
            querier: Some(querier.clone()),
        },
    )
    .await
    .unwrap();
    (qnode, querier, deployer)
}
