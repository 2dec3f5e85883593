use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use qnode::shard::{ShardClient, ShardClientFactory, ShardRpcError};
use qnode_core::{DNodeSystemStatus, PartitionId, TablespaceVersion};

/// Shared script and call log of every mock DNode
#[derive(Default)]
pub struct ShardScript {
    /// Addresses failing at the transport level
    pub down: Mutex<HashSet<String>>,
    /// SQL calls as (address, tablespace, version, partition)
    pub sql_calls: Mutex<Vec<(String, String, u64, PartitionId)>>,
    pub deleted: Mutex<HashMap<String, Vec<TablespaceVersion>>>,
    pub clients_created: Mutex<usize>,
}

impl ShardScript {
    pub fn set_down(&self, address: &str) {
        self.down.lock().insert(address.to_string());
    }

    pub fn sql_call_count(&self) -> usize {
        self.sql_calls.lock().len()
    }

    pub fn deleted_on(&self, address: &str) -> Vec<TablespaceVersion> {
        self.deleted.lock().get(address).cloned().unwrap_or_default()
    }

    fn check_up(&self, address: &str) -> Result<(), ShardRpcError> {
        if self.down.lock().contains(address) {
            Err(ShardRpcError::Transport(format!("{} connection refused", address)))
        } else {
            Ok(())
        }
    }
}

pub struct MockShardClient {
    address: String,
    script: Arc<ShardScript>,
}

#[async_trait]
impl ShardClient for MockShardClient {
    async fn status(&self) -> Result<DNodeSystemStatus, ShardRpcError> {
        self.script.check_up(&self.address)?;
        let mut status = DNodeSystemStatus::new("OK");
        status
            .details
            .insert("address".to_string(), self.address.clone().into());
        Ok(status)
    }

    async fn sql(
        &self,
        tablespace: &str,
        version: u64,
        partition: PartitionId,
        sql: &str,
    ) -> Result<Vec<serde_json::Value>, ShardRpcError> {
        self.script.check_up(&self.address)?;
        self.script.sql_calls.lock().push((
            self.address.clone(),
            tablespace.to_string(),
            version,
            partition,
        ));
        Ok(vec![serde_json::json!({
            "dnode": self.address,
            "partition": partition,
            "sql": sql,
        })])
    }

    async fn delete_old_versions(
        &self,
        versions: &[TablespaceVersion],
    ) -> Result<(), ShardRpcError> {
        self.script.check_up(&self.address)?;
        self.script
            .deleted
            .lock()
            .entry(self.address.clone())
            .or_default()
            .extend(versions.iter().cloned());
        Ok(())
    }
}

pub struct MockShardFactory {
    pub script: Arc<ShardScript>,
}

impl MockShardFactory {
    pub fn new() -> (Arc<Self>, Arc<ShardScript>) {
        let script = Arc::new(ShardScript::default());
        (
            Arc::new(Self {
                script: script.clone(),
            }),
            script,
        )
    }
}

impl ShardClientFactory for MockShardFactory {
    fn create(&self, address: &str) -> Result<Arc<dyn ShardClient>, ShardRpcError> {
        *self.script.clients_created.lock() += 1;
        Ok(Arc::new(MockShardClient {
            address: address.to_string(),
            script: self.script.clone(),
        }))
    }
}
