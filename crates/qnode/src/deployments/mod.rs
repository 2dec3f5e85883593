//! Deployment lifecycle
//!
//! Read side of the deployment panels plus the version operations that do
//! not go through a deployment: rollback and the on-demand retention sweep.

mod deployer;

pub use deployer::{now_string, Deployer, PanelDeployer, DATE_FORMAT};

use std::sync::Arc;
use tracing::{info, warn};

use qnode_core::{
    DeployInfo, DeployRequest, DeployStatus, DeploymentStatus, DeploymentsStatus, StatusMessage,
    SwitchVersionRequest,
};

use crate::coord::CoordinationStructures;
use crate::error::{QNodeError, Result};
use crate::versions::VersionCoordinator;

/// Deployments listed per status bucket
pub const MAX_DEPLOYMENTS_PER_STATUS: usize = 10;

pub struct DeploymentLifecycleTracker {
    coord: CoordinationStructures,
    deployer: Arc<dyn Deployer>,
    versions: Arc<VersionCoordinator>,
}

impl DeploymentLifecycleTracker {
    pub fn new(
        coord: CoordinationStructures,
        deployer: Arc<dyn Deployer>,
        versions: Arc<VersionCoordinator>,
    ) -> Self {
        Self {
            coord,
            deployer,
            versions,
        }
    }

    pub async fn deploy(&self, requests: &[DeployRequest]) -> DeployInfo {
        self.deployer.deploy(requests).await
    }

    /// Deployments bucketed by status, newest first
    pub async fn deployments_status(&self) -> Result<DeploymentsStatus> {
        let mut status = DeploymentsStatus::default();

        for (version, deploy_status) in self.coord.deployments_status_panel.entries().await? {
            let mut entry = DeploymentStatus {
                version,
                ..Default::default()
            };
            match self.coord.deploy_info_panel.get(&version).await? {
                Some(info) => {
                    entry.date = info.started_at;
                    entry.data_uris = info.data_uris;
                    entry.tablespaces_deployed = info.tablespaces_deployed;
                    entry.qnode = info.qnode;
                }
                None => warn!(
                    "No DeployInfo for deployment {}, it should have been persisted with its status",
                    version
                ),
            }

            let mut logs = self
                .coord
                .deploy_log_panel
                .get(&version)
                .await?
                .unwrap_or_default();
            if let Some(speed) = self.coord.deploy_speed_panel.get(&version).await? {
                logs.extend(speed.into_values());
            }
            logs.sort();
            entry.log_messages = logs;

            match deploy_status {
                DeployStatus::Ongoing => status.ongoing.push(entry),
                DeployStatus::Finished => status.finished.push(entry),
                DeployStatus::Failed => status.failed.push(entry),
            }
        }

        for bucket in [&mut status.ongoing, &mut status.finished, &mut status.failed] {
            bucket.sort_by(|a, b| b.date.cmp(&a.date));
            bucket.truncate(MAX_DEPLOYMENTS_PER_STATUS);
        }
        Ok(status)
    }

    /// Serve already deployed versions again
    pub async fn rollback(&self, requests: &[SwitchVersionRequest]) -> StatusMessage {
        match self.versions.switch_versions(requests).await {
            Ok(()) => {
                info!("Rolled back {:?}", requests);
                StatusMessage::ok("Done")
            }
            Err(e @ QNodeError::UnexistingVersion { .. }) => StatusMessage::error(format!(
                "{}. Not possible to rollback to unexisting version.",
                e
            )),
            Err(e) => {
                warn!("Rollback of {:?} failed: {}", requests, e);
                StatusMessage::error(e.to_string())
            }
        }
    }

    pub async fn cancel_deployment(&self, version: &str) -> StatusMessage {
        match version.trim().parse::<u64>() {
            Ok(version) => self.deployer.cancel_deployment(version).await,
            Err(_) => StatusMessage::error(format!("Wrong version number: {}", version)),
        }
    }

    /// Run the retention sweep now and report what it evicted
    pub async fn clean_old_versions(&self) -> Result<StatusMessage> {
        let removed = self.versions.synchronize_tablespace_versions().await?;
        if removed.is_empty() {
            return Ok(StatusMessage::ok(
                "No old tablespace versions to remove. Change versions_per_tablespace \
                 configuration property and restart the QNodes if you intend to free some space.",
            ));
        }
        let removed: Vec<String> = removed.iter().map(ToString::to_string).collect();
        Ok(StatusMessage::ok(format!(
            "Removing tablespace versions: {}",
            removed.join(", ")
        )))
    }
}
