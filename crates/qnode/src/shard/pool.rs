//! Per-shard client pool

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ShardClient, ShardClientFactory, ShardRpcError};

/// Pool of idle clients keyed by shard address
///
/// Only tracked addresses (shards that joined) keep idle clients; calls to
/// untracked addresses use a throwaway client.
pub struct ShardClientPool {
    factory: Arc<dyn ShardClientFactory>,
    pool_size: usize,
    pools: Mutex<HashMap<String, Vec<Arc<dyn ShardClient>>>>,
}

impl ShardClientPool {
    pub fn new(factory: Arc<dyn ShardClientFactory>, pool_size: usize) -> Self {
        Self {
            factory,
            pool_size: pool_size.max(1),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a shard; a no-op if it is already tracked
    pub fn initialize_for(&self, address: &str) -> bool {
        let mut pools = self.pools.lock();
        if pools.contains_key(address) {
            debug!("Client pool for {} already initialized", address);
            return false;
        }
        pools.insert(address.to_string(), Vec::with_capacity(self.pool_size));
        info!("Initialized client pool for {}", address);
        true
    }

    /// Stop tracking a shard, dropping its idle clients
    pub fn discard_for(&self, address: &str) -> bool {
        let removed = self.pools.lock().remove(address).is_some();
        if removed {
            info!("Discarded client pool for {}", address);
        }
        removed
    }

    pub fn is_tracked(&self, address: &str) -> bool {
        self.pools.lock().contains_key(address)
    }

    /// Idle clients currently pooled for a shard
    pub fn idle_count(&self, address: &str) -> usize {
        self.pools.lock().get(address).map_or(0, Vec::len)
    }

    /// Take an idle client or create one
    pub fn checkout(&self, address: &str) -> Result<Arc<dyn ShardClient>, ShardRpcError> {
        if let Some(client) = self
            .pools
            .lock()
            .get_mut(address)
            .and_then(|idle| idle.pop())
        {
            return Ok(client);
        }
        self.factory.create(address)
    }

    /// Give a client back; `renew` drops it instead
    pub fn checkin(&self, address: &str, client: Arc<dyn ShardClient>, renew: bool) {
        if renew {
            debug!("Dropping client for {} after transport failure", address);
            return;
        }
        let mut pools = self.pools.lock();
        if let Some(idle) = pools.get_mut(address) {
            if idle.len() < self.pool_size {
                idle.push(client);
            }
        }
    }

    /// Run `f` with a pooled client, renewing it on transport errors
    pub async fn call<T, F, Fut>(&self, address: &str, f: F) -> Result<T, ShardRpcError>
    where
        F: FnOnce(Arc<dyn ShardClient>) -> Fut,
        Fut: Future<Output = Result<T, ShardRpcError>>,
    {
        let client = self.checkout(address)?;
        let result = f(client.clone()).await;
        let renew = matches!(&result, Err(e) if e.is_transport());
        self.checkin(address, client, renew);
        result
    }
}
