//! Durable local version store
//!
//! Persists the versions being served so a restarted router can merge them
//! back into the coordination store

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info};

use qnode_core::VersionMap;

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Sequence making every temp file name unique within the process
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One JSON file per key under a folder
#[derive(Debug, Clone)]
pub struct TablespaceVersionStore {
    folder: PathBuf,
}

impl TablespaceVersionStore {
    pub fn new<P: AsRef<Path>>(folder: P) -> Self {
        Self {
            folder: folder.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.folder.join(format!("{}.json", key))
    }

    /// Load the map stored under `key`
    pub async fn load(&self, key: &str) -> Result<Option<VersionMap>, StorageError> {
        let path = self.path_for(key);
        if !fs::try_exists(&path).await? {
            debug!("No persisted state at {:?}", path);
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let versions: VersionMap = serde_json::from_str(&content)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Some(versions))
    }

    /// Store `versions` under `key`
    pub async fn store(&self, key: &str, versions: &VersionMap) -> Result<(), StorageError> {
        if !fs::try_exists(&self.folder).await? {
            fs::create_dir_all(&self.folder).await?;
            info!("Created persistence folder: {:?}", self.folder);
        }

        // Write to temp file first, then atomically rename
        let path = self.path_for(key);
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let temp_path = self
            .folder
            .join(format!("{}.json.{}.{}.tmp", key, std::process::id(), seq));
        let content = serde_json::to_string_pretty(versions)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        fs::write(&temp_path, &content).await?;
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Persisted {} tablespace versions to {:?}", versions.len(), path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TablespaceVersionStore::new(dir.path().join("missing"));
        assert!(store.load("versions_being_served").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = TablespaceVersionStore::new(dir.path().join("hz"));

        let mut versions = VersionMap::new();
        versions.insert("users".to_string(), 8);
        versions.insert("orders".to_string(), 2);
        store.store("versions_being_served", &versions).await.unwrap();

        let loaded = store.load("versions_being_served").await.unwrap().unwrap();
        assert_eq!(loaded, versions);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stores_of_one_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = TablespaceVersionStore::new(dir.path());

        let mut writers = Vec::new();
        for version in 0..32u64 {
            let store = store.clone();
            writers.push(tokio::spawn(async move {
                let mut versions = VersionMap::new();
                versions.insert("users".to_string(), version);
                store.store("versions_being_served", &versions).await
            }));
        }
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let loaded = store.load("versions_being_served").await.unwrap().unwrap();
        assert!(loaded["users"] < 32);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .map(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                    .unwrap_or(false)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("k.json"), "not json").unwrap();
        let store = TablespaceVersionStore::new(dir.path());
        assert!(matches!(
            store.load("k").await,
            Err(StorageError::Serialization(_))
        ));
    }
}
