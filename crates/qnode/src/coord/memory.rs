//! In-process replicated map
//!
//! Backs standalone routers and tests. Mutations and their notifications are
//! published under one lock, so every subscriber sees commit order.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::mpsc;

use super::{ClusterView, CoordError, MapEvent, ReplicatedMap};

struct Inner<K, V> {
    data: HashMap<K, V>,
    subscribers: Vec<mpsc::UnboundedSender<MapEvent<K, V>>>,
}

impl<K: Clone, V: Clone> Inner<K, V> {
    fn publish(&mut self, event: MapEvent<K, V>) {
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn write(&mut self, key: K, value: V) -> Option<V>
    where
        K: Eq + Hash,
    {
        let previous = self.data.insert(key.clone(), value.clone());
        let event = if previous.is_some() {
            MapEvent::Updated { key, value }
        } else {
            MapEvent::Added { key, value }
        };
        self.publish(event);
        previous
    }
}

/// Replicated map living in this process
pub struct MemoryMap<K, V> {
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> MemoryMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: HashMap::new(),
                subscribers: Vec::new(),
            }),
        }
    }
}

impl<K, V> Default for MemoryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K, V> ReplicatedMap<K, V> for MemoryMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Option<V>, CoordError> {
        Ok(self.inner.lock().data.get(key).cloned())
    }

    async fn put(&self, key: K, value: V) -> Result<Option<V>, CoordError> {
        Ok(self.inner.lock().write(key, value))
    }

    async fn remove(&self, key: &K) -> Result<Option<V>, CoordError> {
        let mut inner = self.inner.lock();
        let previous = inner.data.remove(key);
        if previous.is_some() {
            inner.publish(MapEvent::Removed { key: key.clone() });
        }
        Ok(previous)
    }

    async fn compare_and_swap(
        &self,
        key: K,
        expected: Option<V>,
        new: V,
    ) -> Result<bool, CoordError> {
        let mut inner = self.inner.lock();
        if inner.data.get(&key) != expected.as_ref() {
            return Ok(false);
        }
        inner.write(key, new);
        Ok(true)
    }

    async fn entries(&self) -> Result<Vec<(K, V)>, CoordError> {
        Ok(self
            .inner
            .lock()
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<MapEvent<K, V>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }
}

/// Single-router cluster
pub struct LocalCluster;

impl ClusterView for LocalCluster {
    fn member_count(&self) -> usize {
        1
    }
}
