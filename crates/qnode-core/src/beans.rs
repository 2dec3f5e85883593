//! Request and response types of the router's external operations

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::dnode::DNodeSystemStatus;
use crate::partition::{PartitionEntry, PartitionId};
use crate::tablespace::Tablespace;

/// Result of a single-partition query
///
/// User-triggerable failures are carried as `Error`, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueryStatus {
    Ok {
        /// Partition that answered
        shard: PartitionId,
        /// Result rows as JSON objects
        rows: Vec<serde_json::Value>,
        /// Time spent in the shard call
        millis: u64,
    },
    Error {
        message: String,
    },
}

impl QueryStatus {
    pub fn error(message: impl Into<String>) -> Self {
        QueryStatus::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueryStatus::Error { .. })
    }

    pub fn rows(&self) -> Option<&[serde_json::Value]> {
        match self {
            QueryStatus::Ok { rows, .. } => Some(rows),
            QueryStatus::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            QueryStatus::Error { message } => Some(message),
            QueryStatus::Ok { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    Error,
}

/// Outcome of an administrative operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: Status,
    pub message: String,
}

impl StatusMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Request to deploy a new version of one tablespace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub tablespace: String,
    /// Location of the built dataset
    pub data_uri: String,
    #[serde(default)]
    pub partition_map: Vec<PartitionEntry>,
    /// Statements every shard runs when opening the data
    #[serde(default)]
    pub init_statements: Vec<String>,
}

/// Detail record of a deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployInfo {
    pub version: Option<u64>,
    /// Start time, `%Y-%m-%d %H:%M:%S`
    pub started_at: String,
    pub data_uris: Vec<String>,
    pub tablespaces_deployed: Vec<String>,
    /// Router that led the deployment
    pub qnode: Option<String>,
    /// Set when the deployment could not be started
    pub error: Option<String>,
}

/// Rollback request: serve `version` for `tablespace`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchVersionRequest {
    pub tablespace: String,
    pub version: u64,
}

/// Deployment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeployStatus {
    Ongoing,
    Finished,
    Failed,
}

/// Introspection view of one deployment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatus {
    pub version: u64,
    /// Empty when no detail record exists
    pub date: String,
    pub data_uris: Vec<String>,
    pub tablespaces_deployed: Vec<String>,
    pub qnode: Option<String>,
    /// Free-text and timed progress lines, chronologically sorted
    pub log_messages: Vec<String>,
}

/// Deployments bucketed by status, newest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentsStatus {
    pub ongoing: Vec<DeploymentStatus>,
    pub finished: Vec<DeploymentStatus>,
    pub failed: Vec<DeploymentStatus>,
}

/// Router overview
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QNodeStatus {
    /// Routers in the coordination cluster
    pub cluster_size: usize,
    pub dnodes: HashMap<String, DNodeSystemStatus>,
    /// Currently served tablespaces with known metadata
    pub tablespace_map: HashMap<String, Tablespace>,
}
