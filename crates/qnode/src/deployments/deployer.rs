//! Deployment execution seam

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use tracing::{info, warn};

use qnode_core::{DeployInfo, DeployRequest, DeployStatus, StatusMessage};

use crate::coord::{CoordError, CoordinationStructures};

/// Format of deployment dates and log line prefixes; sorts chronologically
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now_string() -> String {
    Utc::now().format(DATE_FORMAT).to_string()
}

/// Executes deployments on behalf of the router
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Start a deployment; failures are reported in `DeployInfo::error`
    async fn deploy(&self, requests: &[DeployRequest]) -> DeployInfo;

    async fn cancel_deployment(&self, version: u64) -> StatusMessage;
}

/// Deployer that only keeps the deployment panels
///
/// Registers each deployment as ONGOING with its detail and a log line;
/// moving data to the shards is left to whoever drives them.
pub struct PanelDeployer {
    coord: CoordinationStructures,
    qnode_address: String,
}

impl PanelDeployer {
    pub fn new(coord: CoordinationStructures, qnode_address: impl Into<String>) -> Self {
        Self {
            coord,
            qnode_address: qnode_address.into(),
        }
    }

    /// Claim a fresh deployment version in the status panel
    async fn allocate_version(&self) -> Result<u64, CoordError> {
        let mut version = Utc::now().timestamp_millis().max(0) as u64;
        while !self
            .coord
            .deployments_status_panel
            .compare_and_swap(version, None, DeployStatus::Ongoing)
            .await?
        {
            version += 1;
        }
        Ok(version)
    }

    async fn register(&self, requests: &[DeployRequest]) -> Result<DeployInfo, CoordError> {
        let version = self.allocate_version().await?;
        let started_at = now_string();
        let tablespaces: BTreeSet<&str> = requests.iter().map(|r| r.tablespace.as_str()).collect();

        let info = DeployInfo {
            version: Some(version),
            started_at: started_at.clone(),
            data_uris: requests.iter().map(|r| r.data_uri.clone()).collect(),
            tablespaces_deployed: tablespaces.iter().map(|t| t.to_string()).collect(),
            qnode: Some(self.qnode_address.clone()),
            error: None,
        };
        self.coord.deploy_info_panel.put(version, info.clone()).await?;
        self.coord
            .log_deploy_message(
                version,
                format!(
                    "{} - Deployment {} of [{}] registered by {}",
                    started_at,
                    version,
                    info.tablespaces_deployed.join(", "),
                    self.qnode_address
                ),
            )
            .await?;
        info!(
            "Deployment {} registered for {:?}",
            version, info.tablespaces_deployed
        );
        Ok(info)
    }
}

#[async_trait]
impl Deployer for PanelDeployer {
    async fn deploy(&self, requests: &[DeployRequest]) -> DeployInfo {
        if requests.is_empty() {
            return DeployInfo {
                started_at: now_string(),
                qnode: Some(self.qnode_address.clone()),
                error: Some("No deploy requests given".to_string()),
                ..Default::default()
            };
        }
        match self.register(requests).await {
            Ok(info) => info,
            Err(e) => {
                warn!("Could not register deployment: {}", e);
                DeployInfo {
                    started_at: now_string(),
                    qnode: Some(self.qnode_address.clone()),
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    async fn cancel_deployment(&self, version: u64) -> StatusMessage {
        let panel = self.coord.deployments_status_panel.as_ref();
        let cancelled = match panel.get(&version).await {
            Ok(Some(DeployStatus::Ongoing)) => {
                panel
                    .compare_and_swap(version, Some(DeployStatus::Ongoing), DeployStatus::Failed)
                    .await
            }
            Ok(Some(_)) => Ok(false),
            Ok(None) => return StatusMessage::error(format!("Unknown deployment {}", version)),
            Err(e) => Err(e),
        };

        match cancelled {
            Ok(true) => {
                let line = format!("{} - Deployment cancelled by {}", now_string(), self.qnode_address);
                if let Err(e) = self.coord.log_deploy_message(version, line).await {
                    warn!("Could not log cancellation of deployment {}: {}", version, e);
                }
                info!("Deployment {} cancelled", version);
                StatusMessage::ok(format!("Deployment {} cancelled", version))
            }
            Ok(false) => StatusMessage::error(format!("Deployment {} is not ongoing", version)),
            Err(e) => StatusMessage::error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tablespace: &str) -> DeployRequest {
        DeployRequest {
            tablespace: tablespace.to_string(),
            data_uri: format!("file:///data/{}", tablespace),
            partition_map: Vec::new(),
            init_statements: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_deploy_registers_panels() {
        let coord = CoordinationStructures::in_memory();
        let deployer = PanelDeployer::new(coord.clone(), "qnode-1");

        let info = deployer.deploy(&[request("users"), request("orders")]).await;
        assert!(info.error.is_none());
        let version = info.version.unwrap();

        assert_eq!(
            coord.deployments_status_panel.get(&version).await.unwrap(),
            Some(DeployStatus::Ongoing)
        );
        assert_eq!(
            coord.deploy_info_panel.get(&version).await.unwrap(),
            Some(info.clone())
        );
        assert_eq!(info.tablespaces_deployed, vec!["orders", "users"]);
        assert_eq!(
            coord.deploy_log_panel.get(&version).await.unwrap().unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_deploys_get_distinct_versions() {
        let coord = CoordinationStructures::in_memory();
        let deployer = PanelDeployer::new(coord, "qnode-1");
        let a = deployer.deploy(&[request("users")]).await;
        let b = deployer.deploy(&[request("users")]).await;
        assert_ne!(a.version, b.version);
    }

    #[tokio::test]
    async fn test_empty_deploy_is_an_error() {
        let deployer = PanelDeployer::new(CoordinationStructures::in_memory(), "qnode-1");
        let info = deployer.deploy(&[]).await;
        assert!(info.version.is_none());
        assert!(info.error.is_some());
    }

    #[tokio::test]
    async fn test_cancel_only_ongoing() {
        let coord = CoordinationStructures::in_memory();
        let deployer = PanelDeployer::new(coord.clone(), "qnode-1");
        let version = deployer.deploy(&[request("users")]).await.version.unwrap();

        assert!(deployer.cancel_deployment(version).await.is_ok());
        assert_eq!(
            coord.deployments_status_panel.get(&version).await.unwrap(),
            Some(DeployStatus::Failed)
        );
        assert!(!deployer.cancel_deployment(version).await.is_ok());
        assert!(!deployer.cancel_deployment(42).await.is_ok());
    }
}
