use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;

use super::entry::CachedData;
use super::store::EntityCache;
use crate::clock::Clock;

/// A process-wide resource cached under a single implicit key.
pub struct ResourceCache<V> {
    inner: EntityCache<(), V>,
}

impl<V: Clone> ResourceCache<V> {
    pub fn new(name: &'static str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: EntityCache::new(name, ttl, clock),
        }
    }

    pub fn get(&self) -> Option<V> {
        self.inner.get(&())
    }

    pub fn get_entry(&self) -> Option<CachedData<V>> {
        self.inner.get_entry(&())
    }

    pub fn set(&self, value: V) {
        self.inner.set((), value);
    }

    pub fn invalidate(&self) {
        self.inner.invalidate(&());
    }

    pub fn revision(&self) -> u64 {
        self.inner.revision()
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl()
    }

    pub fn snapshot(&self) -> Option<CachedData<V>> {
        self.inner.snapshot().remove(&())
    }

    pub fn hydrate(&self, entry: Option<CachedData<V>>) {
        self.inner.hydrate(entry.into_iter().map(|e| ((), e)).collect());
    }

    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        self.inner.get_or_fetch((), fetch).await
    }

    pub async fn refresh<F, Fut>(&self, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        self.inner.fetch_into((), fetch).await
    }
}
