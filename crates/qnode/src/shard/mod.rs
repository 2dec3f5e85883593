//! Shard RPC clients
//!
//! Clients are pooled per shard address; a client that failed at the
//! transport level is discarded instead of being reused.

mod http;
mod pool;

pub use http::{HttpShardClient, HttpShardClientFactory};
pub use pool::ShardClientPool;

use async_trait::async_trait;
use std::sync::Arc;

use qnode_core::{DNodeSystemStatus, PartitionId, TablespaceVersion};

/// Shard RPC error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShardRpcError {
    /// Connection-level failure; the client must not be reused
    #[error("Transport error: {0}")]
    Transport(String),
    /// The shard answered with an error
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("No client available for {0}")]
    NotConnected(String),
}

impl ShardRpcError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ShardRpcError::Transport(_))
    }
}

/// Calls a router makes against one shard
#[async_trait]
pub trait ShardClient: Send + Sync {
    async fn status(&self) -> Result<DNodeSystemStatus, ShardRpcError>;

    /// Run `sql` against one partition of a tablespace version
    async fn sql(
        &self,
        tablespace: &str,
        version: u64,
        partition: PartitionId,
        sql: &str,
    ) -> Result<Vec<serde_json::Value>, ShardRpcError>;

    /// Ask the shard to drop on-disk data of evicted versions
    async fn delete_old_versions(
        &self,
        versions: &[TablespaceVersion],
    ) -> Result<(), ShardRpcError>;
}

/// Creates clients for a shard address
pub trait ShardClientFactory: Send + Sync {
    fn create(&self, address: &str) -> Result<Arc<dyn ShardClient>, ShardRpcError>;
}
