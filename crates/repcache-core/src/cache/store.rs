use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use chrono::Duration;
use tracing::debug;

use super::entry::CachedData;
use crate::clock::Clock;

/// Proof that a fetch for `key` was started. Only the most recently issued
/// ticket for a key may write its result back into the store.
#[derive(Debug)]
pub struct FetchTicket<K> {
    key: K,
    seq: u64,
}

impl<K> FetchTicket<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

struct StoreState<K, V> {
    entries: HashMap<K, CachedData<V>>,
    in_flight: HashMap<K, u64>,
    next_seq: u64,
    revision: u64,
}

/// A keyed collection of TTL cache cells.
///
/// Expiry is lazy: an entry found past its TTL on read is removed right there
/// and reported as absent. Explicit invalidation removes entries regardless of
/// age and voids any fetch that was in flight for the key.
pub struct EntityCache<K, V> {
    name: &'static str,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState<K, V>>,
}

impl<K, V> EntityCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            ttl,
            clock,
            state: Mutex::new(StoreState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
                next_seq: 0,
                revision: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn state(&self) -> MutexGuard<'_, StoreState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the fresh entry for `key`, removing it if it has expired.
    pub fn get_entry(&self, key: &K) -> Option<CachedData<V>> {
        let now = self.clock.now();
        let mut state = self.state();
        let entry = state.entries.get(key)?;
        if entry.is_fresh(self.ttl, now) {
            debug!(store = self.name, ?key, "Cache hit");
            return Some(entry.clone());
        }
        debug!(store = self.name, ?key, "Cache entry expired on read");
        state.entries.remove(key);
        state.revision += 1;
        None
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_entry(key).map(|entry| entry.data)
    }

    /// Insert or replace the entry for `key`, stamped with the current time.
    pub fn set(&self, key: K, value: V) {
        let entry = CachedData::new(value, self.clock.now());
        let mut state = self.state();
        state.entries.insert(key, entry);
        state.revision += 1;
    }

    pub fn invalidate(&self, key: &K) {
        let mut state = self.state();
        state.in_flight.remove(key);
        if state.entries.remove(key).is_some() {
            debug!(store = self.name, ?key, "Cache entry invalidated");
            state.revision += 1;
        }
    }

    pub fn invalidate_all(&self) {
        let mut state = self.state();
        state.in_flight.clear();
        if !state.entries.is_empty() {
            debug!(store = self.name, count = state.entries.len(), "Cache cleared");
            state.entries.clear();
            state.revision += 1;
        }
    }

    /// Whether an entry is physically present, without applying expiry.
    pub fn contains_raw(&self, key: &K) -> bool {
        self.state().entries.contains_key(key)
    }

    /// Number of physically present entries, expired or not.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Monotonic counter bumped on every change to the entries.
    pub fn revision(&self) -> u64 {
        self.state().revision
    }

    pub fn snapshot(&self) -> HashMap<K, CachedData<V>> {
        self.state().entries.clone()
    }

    /// Replace the contents with previously persisted entries. Expired entries
    /// are kept; they are dropped on their first read like any other.
    pub fn hydrate(&self, entries: HashMap<K, CachedData<V>>) {
        let mut state = self.state();
        state.entries = entries;
    }

    pub fn begin_fetch(&self, key: K) -> FetchTicket<K> {
        let mut state = self.state();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.in_flight.insert(key.clone(), seq);
        FetchTicket { key, seq }
    }

    /// Store a fetched value if `ticket` is still the latest one issued for its
    /// key and no invalidation happened since. Returns whether it was stored.
    pub fn complete_fetch(&self, ticket: FetchTicket<K>, value: V) -> bool {
        let now = self.clock.now();
        let mut state = self.state();
        if state.in_flight.get(&ticket.key) != Some(&ticket.seq) {
            debug!(
                store = self.name,
                key = ?ticket.key,
                seq = ticket.seq,
                "Discarding superseded fetch result"
            );
            return false;
        }
        state.in_flight.remove(&ticket.key);
        state.entries.insert(ticket.key, CachedData::new(value, now));
        state.revision += 1;
        true
    }

    /// Release a ticket whose fetch failed, leaving the entries untouched.
    pub fn abandon_fetch(&self, ticket: FetchTicket<K>) {
        let mut state = self.state();
        if state.in_flight.get(&ticket.key) == Some(&ticket.seq) {
            state.in_flight.remove(&ticket.key);
        }
    }

    /// Serve `key` from the cache, or run `fetch` and cache its result.
    ///
    /// A failed fetch leaves the store untouched and the error is returned.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        self.fetch_into(key, fetch).await
    }

    /// Run `fetch` unconditionally and cache its result.
    pub async fn fetch_into<F, Fut>(&self, key: K, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        debug!(store = self.name, ?key, "Cache miss, fetching");
        let ticket = self.begin_fetch(key);
        match fetch().await {
            Ok(value) => {
                self.complete_fetch(ticket, value.clone());
                Ok(value)
            }
            Err(e) => {
                self.abandon_fetch(ticket);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use proptest::prelude::*;

    use super::*;
    use crate::clock::ManualClock;

    fn store(ttl_minutes: i64) -> (Arc<ManualClock>, EntityCache<i64, String>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = EntityCache::new("test", Duration::minutes(ttl_minutes), clock.clone());
        (clock, cache)
    }

    #[test]
    fn test_set_then_get_within_ttl() {
        let (clock, cache) = store(5);
        cache.set(42, "history".to_string());
        clock.advance(Duration::minutes(4));
        assert_eq!(cache.get(&42).as_deref(), Some("history"));
    }

    #[test]
    fn test_expired_entry_is_removed_on_read() {
        let (clock, cache) = store(5);
        cache.set(42, "history".to_string());
        clock.advance(Duration::minutes(5));
        assert!(cache.contains_raw(&42));
        assert_eq!(cache.get(&42), None);
        assert!(!cache.contains_raw(&42));
    }

    #[test]
    fn test_invalidate_ignores_remaining_ttl() {
        let (_clock, cache) = store(60);
        cache.set(1, "a".to_string());
        cache.invalidate(&1);
        assert_eq!(cache.get(&1), None);
        // No-op when absent
        cache.invalidate(&1);
    }

    #[test]
    fn test_invalidate_all_clears_every_key() {
        let (_clock, cache) = store(5);
        cache.set(1, "a".to_string());
        cache.set(2, "b".to_string());
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_restamps_with_new_entry() {
        let (clock, cache) = store(5);
        cache.set(1, "old".to_string());
        clock.advance(Duration::minutes(4));
        cache.set(1, "new".to_string());
        clock.advance(Duration::minutes(4));
        assert_eq!(cache.get(&1).as_deref(), Some("new"));
    }

    #[test]
    fn test_revision_tracks_changes() {
        let (_clock, cache) = store(5);
        let start = cache.revision();
        cache.set(1, "a".to_string());
        cache.invalidate(&2);
        assert_eq!(cache.revision(), start + 1);
    }

    #[test]
    fn test_superseded_fetch_is_discarded() {
        let (_clock, cache) = store(5);
        let older = cache.begin_fetch(7);
        let newer = cache.begin_fetch(7);
        assert!(cache.complete_fetch(newer, "newer".to_string()));
        assert!(!cache.complete_fetch(older, "older".to_string()));
        assert_eq!(cache.get(&7).as_deref(), Some("newer"));
    }

    #[test]
    fn test_invalidation_voids_in_flight_fetch() {
        let (_clock, cache) = store(5);
        let ticket = cache.begin_fetch(7);
        cache.invalidate(&7);
        assert!(!cache.complete_fetch(ticket, "stale".to_string()));
        assert_eq!(cache.get(&7), None);
    }

    #[tokio::test]
    async fn test_get_or_fetch_hits_cache() {
        let (_clock, cache) = store(5);
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cache
                .get_or_fetch(3, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("fetched".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "fetched");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_store_untouched() {
        let (clock, cache) = store(5);
        cache.set(3, "cached".to_string());
        clock.advance(Duration::minutes(6));

        let result = cache
            .get_or_fetch(3, || async { Err(anyhow::anyhow!("network down")) })
            .await;
        assert!(result.is_err());
        assert!(!cache.contains_raw(&3));

        cache.set(4, "kept".to_string());
        let result = cache
            .fetch_into(4, || async { Err(anyhow::anyhow!("network down")) })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.get(&4).as_deref(), Some("kept"));
    }

    proptest! {
        #[test]
        fn prop_set_get_within_ttl(key in any::<i64>(), value in ".*", ttl in 1i64..240, elapsed_frac in 0.0f64..1.0) {
            let (clock, cache) = store(ttl);
            cache.set(key, value.clone());
            let elapsed_ms = ((ttl * 60_000) as f64 * elapsed_frac) as i64;
            clock.advance(Duration::milliseconds(elapsed_ms.min(ttl * 60_000 - 1)));
            prop_assert_eq!(cache.get(&key), Some(value));
        }

        #[test]
        fn prop_get_after_ttl_is_absent_and_removed(key in any::<i64>(), ttl in 1i64..240, extra in 0i64..10_000) {
            let (clock, cache) = store(ttl);
            cache.set(key, "v".to_string());
            clock.advance(Duration::minutes(ttl) + Duration::seconds(extra));
            prop_assert_eq!(cache.get(&key), None);
            prop_assert!(!cache.contains_raw(&key));
        }

        #[test]
        fn prop_invalidate_then_get_is_absent(key in any::<i64>(), ttl in 1i64..240) {
            let (_clock, cache) = store(ttl);
            cache.set(key, "v".to_string());
            cache.invalidate(&key);
            prop_assert_eq!(cache.get(&key), None);
        }
    }
}
