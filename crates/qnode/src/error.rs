//! Router error types

use crate::coord::CoordError;
use crate::shard::ShardRpcError;
use crate::storage::StorageError;

/// Router error
#[derive(Debug, thiserror::Error)]
pub enum QNodeError {
    #[error("Coordination error: {0}")]
    Coordination(#[from] CoordError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Shard RPC error: {0}")]
    ShardRpc(#[from] ShardRpcError),
    #[error("Unexisting version {version} for tablespace {tablespace}")]
    UnexistingVersion { tablespace: String, version: u64 },
    #[error("Unknown DNode: {0}")]
    UnknownDNode(String),
    #[error("Unexpected key {key} for map {map}")]
    UnexpectedKey { key: String, map: String },
}

pub type Result<T> = std::result::Result<T, QNodeError>;
