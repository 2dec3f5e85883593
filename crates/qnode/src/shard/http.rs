//! HTTP/JSON shard client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use qnode_core::{DNodeSystemStatus, PartitionId, TablespaceVersion};

use super::{ShardClient, ShardClientFactory, ShardRpcError};

impl From<reqwest::Error> for ShardRpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            ShardRpcError::Transport(e.to_string())
        } else {
            ShardRpcError::Remote(e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<Option<T>, ShardRpcError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ShardRpcError::Remote(self.error.unwrap_or_default()))
        }
    }
}

#[derive(Serialize)]
struct SqlRequest<'a> {
    tablespace: &'a str,
    version: u64,
    partition: PartitionId,
    sql: &'a str,
}

/// Client for one shard's HTTP API
pub struct HttpShardClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpShardClient {
    pub fn new(address: &str, timeout: Duration) -> Result<Self, ShardRpcError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ShardRpcError::Transport(e.to_string()))?;
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address)
        };
        Ok(Self {
            base_url,
            http_client,
        })
    }
}

#[async_trait]
impl ShardClient for HttpShardClient {
    async fn status(&self) -> Result<DNodeSystemStatus, ShardRpcError> {
        let url = format!("{}/api/status", self.base_url);
        let resp: ApiResponse<DNodeSystemStatus> =
            self.http_client.get(&url).send().await?.json().await?;
        resp.into_result()?
            .ok_or_else(|| ShardRpcError::Remote("No data".into()))
    }

    async fn sql(
        &self,
        tablespace: &str,
        version: u64,
        partition: PartitionId,
        sql: &str,
    ) -> Result<Vec<serde_json::Value>, ShardRpcError> {
        let url = format!("{}/api/sql", self.base_url);
        let req = SqlRequest {
            tablespace,
            version,
            partition,
            sql,
        };
        let resp: ApiResponse<Vec<serde_json::Value>> = self
            .http_client
            .post(&url)
            .json(&req)
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.into_result()?.unwrap_or_default())
    }

    async fn delete_old_versions(
        &self,
        versions: &[TablespaceVersion],
    ) -> Result<(), ShardRpcError> {
        let url = format!("{}/api/versions/delete", self.base_url);
        let resp: ApiResponse<serde_json::Value> = self
            .http_client
            .post(&url)
            .json(versions)
            .send()
            .await?
            .json()
            .await?;
        resp.into_result().map(|_| ())
    }
}

/// Factory for `HttpShardClient`
pub struct HttpShardClientFactory {
    timeout: Duration,
}

impl HttpShardClientFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ShardClientFactory for HttpShardClientFactory {
    fn create(&self, address: &str) -> Result<Arc<dyn ShardClient>, ShardRpcError> {
        Ok(Arc::new(HttpShardClient::new(address, self.timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let client = HttpShardClient::new("127.0.0.1:4422", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://127.0.0.1:4422");

        let client =
            HttpShardClient::new("https://dnode.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "https://dnode.local");
    }

    #[tokio::test]
    async fn test_unreachable_shard_is_transport_error() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let client = HttpShardClient::new("127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.status().await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
    }
}
