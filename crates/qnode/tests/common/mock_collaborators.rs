use async_trait::async_trait;
use parking_lot::Mutex;

use qnode::deployments::Deployer;
use qnode::querier::Querier;
use qnode_core::{DeployInfo, DeployRequest, PartitionId, QueryStatus, StatusMessage};

/// One call received by the recording querier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerierCall {
    Key {
        tablespace: String,
        key: Option<String>,
        partition: Option<PartitionId>,
    },
    Partition {
        tablespace: String,
        version: u64,
        partition: PartitionId,
    },
}

/// Querier answering every call with an empty success
#[derive(Default)]
pub struct RecordingQuerier {
    pub calls: Mutex<Vec<QuerierCall>>,
}

impl RecordingQuerier {
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn partitions_queried(&self) -> Vec<PartitionId> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                QuerierCall::Partition { partition, .. } => Some(*partition),
                QuerierCall::Key { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl Querier for RecordingQuerier {
    async fn query(
        &self,
        tablespace: &str,
        key: Option<&str>,
        _sql: &str,
        partition: Option<PartitionId>,
    ) -> QueryStatus {
        self.calls.lock().push(QuerierCall::Key {
            tablespace: tablespace.to_string(),
            key: key.map(str::to_string),
            partition,
        });
        QueryStatus::Ok {
            shard: partition.unwrap_or(0),
            rows: vec![serde_json::json!({"n": 1})],
            millis: 0,
        }
    }

    async fn query_partition(
        &self,
        tablespace: &str,
        version: u64,
        _sql: &str,
        partition: PartitionId,
    ) -> QueryStatus {
        self.calls.lock().push(QuerierCall::Partition {
            tablespace: tablespace.to_string(),
            version,
            partition,
        });
        QueryStatus::Ok {
            shard: partition,
            rows: Vec::new(),
            millis: 0,
        }
    }
}

/// Deployer remembering what it was asked to do
#[derive(Default)]
pub struct RecordingDeployer {
    pub deploys: Mutex<Vec<Vec<DeployRequest>>>,
    pub cancels: Mutex<Vec<u64>>,
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(&self, requests: &[DeployRequest]) -> DeployInfo {
        self.deploys.lock().push(requests.to_vec());
        DeployInfo {
            version: Some(99),
            tablespaces_deployed: requests.iter().map(|r| r.tablespace.clone()).collect(),
            ..Default::default()
        }
    }

    async fn cancel_deployment(&self, version: u64) -> StatusMessage {
        self.cancels.lock().push(version);
        StatusMessage::ok(format!("cancelled {}", version))
    }
}
