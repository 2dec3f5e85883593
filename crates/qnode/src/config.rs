//! Configuration module for the QNode router
//!
//! Supports YAML configuration files with module-based organization

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QNodeConfig {
    /// Router configuration
    #[serde(default)]
    pub qnode: RouterConfig,
    /// Local persistence configuration
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Shard client configuration
    #[serde(default)]
    pub shard_client: ShardClientConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub http: HttpConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl QNodeConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Advertised address, recorded as the originator of deployments
    #[serde(default = "default_address")]
    pub address: String,
    /// Retained versions per tablespace besides the one being served
    #[serde(default = "default_versions_per_tablespace")]
    pub versions_per_tablespace: usize,
    /// Startup grace period in seconds
    #[serde(default = "default_warming_time_secs")]
    pub warming_time_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            versions_per_tablespace: default_versions_per_tablespace(),
            warming_time_secs: default_warming_time_secs(),
        }
    }
}

impl RouterConfig {
    /// Get warming time as Duration
    pub fn warming_time(&self) -> Duration {
        Duration::from_secs(self.warming_time_secs)
    }
}

/// Local persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Folder for the durable version store; disabled when absent or empty
    #[serde(default)]
    pub folder: Option<PathBuf>,
}

impl PersistenceConfig {
    /// Effective persistence folder
    pub fn enabled_folder(&self) -> Option<&PathBuf> {
        self.folder.as_ref().filter(|f| !f.as_os_str().is_empty())
    }
}

/// Shard client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardClientConfig {
    /// Pooled clients per shard
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ShardClientConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ShardClientConfig {
    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// HTTP API listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions

fn default_address() -> String {
    "127.0.0.1:4412".to_string()
}

fn default_versions_per_tablespace() -> usize {
    10
}

fn default_warming_time_secs() -> u64 {
    60
}

fn default_pool_size() -> usize {
    40
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_listen_addr() -> String {
    "0.0.0.0:4412".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = QNodeConfig::default();
        assert_eq!(cfg.qnode.versions_per_tablespace, 10);
        assert_eq!(cfg.qnode.warming_time(), Duration::from_secs(60));
        assert_eq!(cfg.shard_client.pool_size, 40);
        assert!(cfg.persistence.enabled_folder().is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
qnode:
  versions_per_tablespace: 2
persistence:
  folder: /var/lib/qnode
"#;
        let cfg = QNodeConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.qnode.versions_per_tablespace, 2);
        assert_eq!(cfg.qnode.warming_time_secs, 60);
        assert_eq!(
            cfg.persistence.enabled_folder(),
            Some(&PathBuf::from("/var/lib/qnode"))
        );
        assert_eq!(cfg.http.listen_addr, "0.0.0.0:4412");
    }

    #[test]
    fn test_empty_persistence_folder_disables_store() {
        let cfg = QNodeConfig::from_yaml("persistence:\n  folder: \"\"\n").unwrap();
        assert!(cfg.persistence.enabled_folder().is_none());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            QNodeConfig::from_yaml("qnode: [1, 2"),
            Err(ConfigError::ParseError(_))
        ));
    }
}
