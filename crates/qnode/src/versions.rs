//! Versions being served
//!
//! The `VersionCoordinator` owns the tablespace -> version routing table.
//! The cluster-wide copy lives in the coordination store under
//! `KEY_FOR_VERSIONS_BEING_SERVED`; every router keeps an in-memory copy for
//! the query path and a durable copy that survives restarts.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use qnode_core::{SwitchVersionRequest, TablespaceVersion, VersionMap};

use crate::catalogue::TablespaceCatalogue;
use crate::coord::{update_with_retry, CoordinationStructures, MapEvent, KEY_FOR_VERSIONS_BEING_SERVED};
use crate::error::{QNodeError, Result};
use crate::shard::ShardClientPool;
use crate::storage::TablespaceVersionStore;

/// Per-tablespace exclusive sections
///
/// Rollback and the retention sweep both take the lock of every tablespace
/// they touch, so a sweep never evicts a version a rollback is pinning.
#[derive(Default)]
pub struct TablespaceLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TablespaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, tablespace: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(tablespace.to_string())
            .or_default()
            .clone()
    }

    pub async fn lock(&self, tablespace: &str) -> OwnedMutexGuard<()> {
        self.lock_for(tablespace).lock_owned().await
    }

    /// Lock several tablespaces, always in name order
    pub async fn lock_all<'a, I>(&self, tablespaces: I) -> Vec<OwnedMutexGuard<()>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let sorted: BTreeSet<&str> = tablespaces.into_iter().collect();
        let mut guards = Vec::with_capacity(sorted.len());
        for tablespace in sorted {
            guards.push(self.lock(tablespace).await);
        }
        guards
    }
}

/// Keeper of the versions being served
pub struct VersionCoordinator {
    coord: CoordinationStructures,
    store: Option<TablespaceVersionStore>,
    catalogue: Arc<TablespaceCatalogue>,
    pool: Arc<ShardClientPool>,
    locks: TablespaceLocks,
    versions_per_tablespace: usize,
    current: RwLock<Arc<VersionMap>>,
    /// Orders every install of `current` with its write to the durable store
    apply_lock: tokio::sync::Mutex<()>,
}

impl VersionCoordinator {
    pub fn new(
        coord: CoordinationStructures,
        store: Option<TablespaceVersionStore>,
        catalogue: Arc<TablespaceCatalogue>,
        pool: Arc<ShardClientPool>,
        versions_per_tablespace: usize,
    ) -> Self {
        Self {
            coord,
            store,
            catalogue,
            pool,
            locks: TablespaceLocks::new(),
            versions_per_tablespace,
            current: RwLock::new(Arc::new(VersionMap::new())),
            apply_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Merge persisted and distributed state, then follow changes
    ///
    /// The subscription is taken before the distributed copy is read so no
    /// committed write between the two is missed.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut events = self.coord.versions_being_served.subscribe();

        let persisted = match &self.store {
            Some(store) => match store.load(KEY_FOR_VERSIONS_BEING_SERVED).await? {
                Some(versions) => {
                    info!("Loaded tablespace versions to be served from disk: {:?}", versions);
                    versions
                }
                None => {
                    info!("No state about versions to be served in disk.");
                    VersionMap::new()
                }
            },
            None => VersionMap::new(),
        };

        let key = KEY_FOR_VERSIONS_BEING_SERVED.to_string();
        let merged = update_with_retry(self.coord.versions_being_served.as_ref(), &key, |distributed| {
            let mut merged = persisted.clone();
            if let Some(distributed) = distributed {
                merged.extend(distributed.iter().map(|(k, v)| (k.clone(), *v)));
            }
            merged
        })
        .await?;

        {
            let _applying = self.apply_lock.lock().await;
            self.persist(&merged).await?;
            self.install(merged.clone());
        }
        info!(
            "Tablespace versions after merging disk state with the coordination store: {:?}",
            merged
        );

        let this = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Err(e) = this.handle_event(event).await {
                    error!("Dropping versions event: {}", e);
                }
            }
            debug!("Versions listener stopped");
        }))
    }

    /// Apply one change notification of the versions map
    pub async fn handle_event(&self, event: MapEvent<String, VersionMap>) -> Result<()> {
        match event {
            MapEvent::Added { key, value } | MapEvent::Updated { key, value } => {
                check_key(&key)?;
                if let Err(e) = self.apply_versions(&value).await {
                    error!(
                        "Error changing served tablespace versions to {:?}. Routing may now be unstable: {}",
                        value, e
                    );
                    return Ok(());
                }
                if let Err(e) = self.synchronize_tablespace_versions().await {
                    error!("Retention sweep after versions change failed: {}", e);
                }
            }
            MapEvent::Removed { key } => {
                check_key(&key)?;
                info!("Versions table removed, clearing all tablespace versions");
                let _applying = self.apply_lock.lock().await;
                self.install(VersionMap::new());
            }
            MapEvent::Evicted { key } => {
                warn!("Ignoring eviction of {} from the versions map", key);
            }
            MapEvent::Cleared => {
                warn!("Ignoring clear of the versions map");
            }
        }
        Ok(())
    }

    /// Merge `incoming` into the local copy and persist the result
    ///
    /// Incoming entries win; tablespaces only known locally are kept.
    /// Concurrent calls are applied one at a time, so the durable copy is
    /// always the last map installed.
    pub async fn apply_versions(&self, incoming: &VersionMap) -> Result<()> {
        let _applying = self.apply_lock.lock().await;
        let merged = {
            let mut guard = self.current.write();
            let mut next = VersionMap::clone(&guard);
            next.extend(incoming.iter().map(|(k, v)| (k.clone(), *v)));
            *guard = Arc::new(next.clone());
            next
        };
        info!("Local tablespace versions to serve: {:?}", merged);
        self.persist(&merged).await
    }

    fn install(&self, versions: VersionMap) {
        *self.current.write() = Arc::new(versions);
    }

    async fn persist(&self, versions: &VersionMap) -> Result<()> {
        if let Some(store) = &self.store {
            store.store(KEY_FOR_VERSIONS_BEING_SERVED, versions).await?;
        }
        Ok(())
    }

    /// Snapshot of the versions being served
    pub fn current(&self) -> Arc<VersionMap> {
        self.current.read().clone()
    }

    pub fn version_of(&self, tablespace: &str) -> Option<u64> {
        self.current.read().get(tablespace).copied()
    }

    pub fn tablespaces(&self) -> BTreeSet<String> {
        self.current.read().keys().cloned().collect()
    }

    /// Retention sweep
    ///
    /// Keeps the newest `versions_per_tablespace` versions of each tablespace
    /// plus the one being served, drops the rest from the catalogue and asks
    /// the shards holding them to delete their data.
    pub async fn synchronize_tablespace_versions(&self) -> Result<Vec<TablespaceVersion>> {
        let mut removed = Vec::new();
        let mut holders: HashMap<String, Vec<TablespaceVersion>> = HashMap::new();

        for tablespace in self.catalogue.versions_by_tablespace().into_keys() {
            let _guard = self.locks.lock(&tablespace).await;
            let served = self.version_of(&tablespace);
            let versions: Vec<u64> = self.catalogue.versions_of(&tablespace).into_keys().collect();

            let evict: Vec<TablespaceVersion> = versions
                .iter()
                .rev()
                .skip(self.versions_per_tablespace)
                .filter(|v| Some(**v) != served)
                .map(|v| TablespaceVersion::new(tablespace.clone(), *v))
                .collect();

            for (tv, dropped) in self.catalogue.remove(&evict) {
                for node in dropped.replication_map.all_nodes() {
                    holders.entry(node).or_default().push(tv.clone());
                }
                removed.push(tv);
            }
        }

        if !removed.is_empty() {
            let names: Vec<String> = removed.iter().map(ToString::to_string).collect();
            info!("Removing old tablespace versions: {}", names.join(", "));
        }

        for (node, versions) in holders {
            let result = self
                .pool
                .call(&node, |client| async move {
                    client.delete_old_versions(&versions).await
                })
                .await;
            if let Err(e) = result {
                warn!("Could not ask {} to delete old versions: {}", node, e);
            }
        }

        Ok(removed)
    }

    /// Point tablespaces at already deployed versions
    ///
    /// Fails without touching the versions map if any target version is not
    /// catalogued.
    pub async fn switch_versions(&self, requests: &[SwitchVersionRequest]) -> Result<()> {
        let _guards = self
            .locks
            .lock_all(requests.iter().map(|r| r.tablespace.as_str()))
            .await;

        for request in requests {
            let tv = TablespaceVersion::new(request.tablespace.clone(), request.version);
            if !self.catalogue.contains(&tv) {
                return Err(QNodeError::UnexistingVersion {
                    tablespace: request.tablespace.clone(),
                    version: request.version,
                });
            }
        }

        let key = KEY_FOR_VERSIONS_BEING_SERVED.to_string();
        let updated = update_with_retry(self.coord.versions_being_served.as_ref(), &key, |current| {
            let mut next = current.cloned().unwrap_or_default();
            for request in requests {
                next.insert(request.tablespace.clone(), request.version);
            }
            next
        })
        .await?;

        // The switch is committed cluster-wide; a failed local write is not a failed rollback
        if let Err(e) = self.apply_versions(&updated).await {
            error!(
                "Versions switched to {:?} but the local copy could not be persisted: {}",
                updated, e
            );
        }
        Ok(())
    }
}

fn check_key(key: &str) -> Result<()> {
    if key != KEY_FOR_VERSIONS_BEING_SERVED {
        return Err(QNodeError::UnexpectedKey {
            key: key.to_string(),
            map: KEY_FOR_VERSIONS_BEING_SERVED.to_string(),
        });
    }
    Ok(())
}
