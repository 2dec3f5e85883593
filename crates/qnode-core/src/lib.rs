//! Core tablespace and partition model
//!
//! Shared by the router and its collaborators:
//! - Key / key range to partition mapping
//! - Tablespace versions and their shard placement
//! - Shard registration entries
//! - Request and response types

pub mod beans;
pub mod dnode;
pub mod partition;
pub mod tablespace;

// Re-export commonly used types
pub use beans::{
    DeployInfo, DeployRequest, DeployStatus, DeploymentStatus, DeploymentsStatus, QNodeStatus,
    QueryStatus, Status, StatusMessage, SwitchVersionRequest,
};
pub use dnode::{DNodeInfo, DNodeSystemStatus, PartitionMetadata, ServingInfo, UNREACHABLE};
pub use partition::{PartitionEntry, PartitionId, PartitionMap, NO_PARTITION};
pub use tablespace::{ReplicationEntry, ReplicationMap, Tablespace, TablespaceVersion, VersionMap};
