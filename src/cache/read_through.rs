//! Read-through cache with stale-while-revalidate
//!
//! Every cached read goes through [`ReadThroughCache::fetch`]:
//!
//! 1. fresh hit: return the cached value, flagged [`CacheStatus::Fresh`]
//! 2. stale hit: return the cached value, flagged [`CacheStatus::Stale`], and
//!    refresh the key on a detached task
//! 3. miss: run the loader, store its result, flagged [`CacheStatus::Miss`]
//!
//! The cache store is never a correctness dependency. Read errors and
//! undecodable entries are treated as misses, write and invalidation errors
//! are logged and dropped.
//!
//! Loads that started before an invalidation never write their result back.
//! Every invalidation bumps an epoch under a write lock, and a load only
//! stores its value while holding the read lock on an unchanged epoch.

use crate::cache::{
    invalidation::InvalidationPlan,
    store::CacheStore,
    types::{CacheStatus, CacheValue},
};
use crate::error::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Response envelope carrying the freshness marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cached<T> {
    pub data: T,
    pub cached: CacheStatus,
}

impl<T> Cached<T> {
    pub fn new(data: T, cached: CacheStatus) -> Self {
        Self { data, cached }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Cached<U> {
        Cached {
            data: f(self.data),
            cached: self.cached,
        }
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

/// Counters for background refresh tasks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshStats {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    /// Stale reads that found a refresh already running for the key
    pub deduplicated: u64,
    /// Refreshes whose result was dropped because an invalidation ran meanwhile
    pub discarded: u64,
}

#[derive(Default)]
struct RefreshCounters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    deduplicated: AtomicU64,
    discarded: AtomicU64,
}

/// Read-through front for a [`CacheStore`]
#[derive(Clone)]
pub struct ReadThroughCache {
    store: Arc<dyn CacheStore>,

    /// TTL for entries written by this cache; `None` uses the store default
    ttl: Option<Duration>,

    /// Keys with a refresh task in flight
    in_flight: Arc<Mutex<HashSet<String>>>,

    counters: Arc<RefreshCounters>,

    /// Bumped by every invalidation
    epoch: Arc<RwLock<u64>>,
}

impl ReadThroughCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            ttl: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            counters: Arc::new(RefreshCounters::default()),
            epoch: Arc::new(RwLock::new(0)),
        }
    }

    /// Write entries with an explicit TTL instead of the store default
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Read `key`, falling back to `loader` on a miss
    ///
    /// Only loader errors reach the caller.
    pub async fn fetch<T, F, Fut>(&self, key: &str, loader: F) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        match self.store.get(key).await {
            Ok(Some(hit)) => match serde_json::from_value::<T>(hit.value) {
                Ok(data) if hit.remaining_ttl_secs > 0 => {
                    debug!(key, ttl = hit.remaining_ttl_secs, "Serving fresh cache entry");
                    return Ok(Cached::new(data, CacheStatus::Fresh));
                }
                Ok(data) => {
                    debug!(key, ttl = hit.remaining_ttl_secs, "Serving stale cache entry");
                    self.spawn_refresh(key, loader).await;
                    return Ok(Cached::new(data, CacheStatus::Stale));
                }
                Err(e) => {
                    warn!(key, error = %e, "Cached value could not be decoded, reloading");
                }
            },
            Ok(None) => {
                debug!(key, "Cache miss");
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
            }
        }

        let started_at = *self.epoch.read().await;
        let data = loader().await?;
        match serde_json::to_value(&data) {
            Ok(value) => {
                let stored = write_if_current(
                    &self.epoch,
                    started_at,
                    self.store.as_ref(),
                    key,
                    value,
                    self.ttl,
                )
                .await;
                if !stored {
                    debug!(key, "Invalidated during load, result not cached");
                }
            }
            Err(e) => warn!(key, error = %e, "Loaded value could not be encoded for caching"),
        }

        Ok(Cached::new(data, CacheStatus::Miss))
    }

    /// Detach a refresh of `key`; at most one runs per key
    async fn spawn_refresh<T, F, Fut>(&self, key: &str, loader: F)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(key.to_string()) {
                self.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Refresh already in flight");
                return;
            }
        }
        self.counters.started.fetch_add(1, Ordering::Relaxed);

        let key = key.to_string();
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let counters = Arc::clone(&self.counters);
        let epoch = Arc::clone(&self.epoch);
        let started_at = *epoch.read().await;
        let ttl = self.ttl;

        tokio::spawn(async move {
            match loader().await {
                Ok(data) => match serde_json::to_value(&data) {
                    Ok(value) => {
                        let stored =
                            write_if_current(&epoch, started_at, store.as_ref(), &key, value, ttl)
                                .await;
                        if stored {
                            counters.completed.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %key, "Background refresh completed");
                        } else {
                            counters.discarded.fetch_add(1, Ordering::Relaxed);
                            debug!(key = %key, "Invalidated during refresh, result dropped");
                        }
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(key = %key, error = %e, "Refreshed value could not be encoded");
                    }
                },
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "Background refresh failed");
                }
            }

            in_flight.lock().await.remove(&key);
        });
    }

    /// Number of keys with a refresh still running
    pub async fn pending_refreshes(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        RefreshStats {
            started: self.counters.started.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            deduplicated: self.counters.deduplicated.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Best-effort pattern delete; returns 0 when the store is unreachable
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let mut epoch = self.epoch.write().await;
        *epoch += 1;
        match self.store.invalidate(pattern).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(pattern, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Apply every pattern of `plan`, returning the total removed
    pub async fn invalidate_plan(&self, plan: &InvalidationPlan) -> usize {
        let mut removed = 0;
        for pattern in &plan.patterns {
            removed += self.invalidate(pattern).await;
        }

        info!(
            reason = %plan.reason,
            patterns = plan.patterns.len(),
            removed,
            "Applied cache invalidation plan"
        );
        removed
    }
}

/// Store `value` unless an invalidation ran since `started_at`
async fn write_if_current(
    epoch: &RwLock<u64>,
    started_at: u64,
    store: &dyn CacheStore,
    key: &str,
    value: CacheValue,
    ttl: Option<Duration>,
) -> bool {
    let current = epoch.read().await;
    if *current != started_at {
        return false;
    }
    write_entry(store, key, value, ttl).await;
    true
}

async fn write_entry(store: &dyn CacheStore, key: &str, value: CacheValue, ttl: Option<Duration>) {
    let result = match ttl {
        Some(ttl) => store.set_with_ttl(key, value, ttl).await,
        None => store.set(key, value).await,
    };
    if let Err(e) = result {
        warn!(key, error = %e, "Cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{config::CacheConfig, store::MemoryCacheStore};
    use crate::error::LmsError;
    use serde_json::json;

    fn memory_store() -> Arc<MemoryCacheStore> {
        Arc::new(MemoryCacheStore::new(
            CacheConfig::builder()
                .default_ttl(Duration::from_secs(60))
                .ttl_jitter(0.0)
                .build(),
        ))
    }

    #[tokio::test]
    async fn test_miss_then_fresh_hit() {
        let store = memory_store();
        let cache = ReadThroughCache::new(store.clone());

        let first: Cached<Vec<String>> = cache
            .fetch("chapters:course_id=c-1", || async { Ok(vec!["A".to_string()]) })
            .await
            .unwrap();
        assert_eq!(first.cached, CacheStatus::Miss);

        let second: Cached<Vec<String>> = cache
            .fetch("chapters:course_id=c-1", || async {
                Err(LmsError::Other("loader must not run".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(second.cached, CacheStatus::Fresh);
        assert_eq!(second.data, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_loader_error_propagates_on_miss() {
        let cache = ReadThroughCache::new(memory_store());

        let result: Result<Cached<i32>> = cache
            .fetch("course:id=missing", || async {
                Err(LmsError::missing("Course", "missing"))
            })
            .await;
        assert!(matches!(result, Err(LmsError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_reloaded() {
        let store = memory_store();
        store.set("k", json!("not a number")).await.unwrap();
        let cache = ReadThroughCache::new(store.clone());

        let read: Cached<i64> = cache.fetch("k", || async { Ok(7) }).await.unwrap();
        assert_eq!(read.cached, CacheStatus::Miss);
        assert_eq!(read.data, 7);
        assert_eq!(store.get("k").await.unwrap().unwrap().value, json!(7));
    }

    #[tokio::test]
    async fn test_outage_fails_open() {
        let store = memory_store();
        let cache = ReadThroughCache::new(store.clone());
        store.set_available(false);

        let read: Cached<i64> = cache.fetch("k", || async { Ok(1) }).await.unwrap();
        assert_eq!(read.cached, CacheStatus::Miss);
        assert_eq!(cache.invalidate("k*").await, 0);
    }

    #[test]
    fn test_cached_envelope_serialization() {
        let envelope = Cached::new(json!({"id": "ch-1"}), CacheStatus::Stale);
        let rendered = serde_json::to_value(&envelope).unwrap();
        assert_eq!(rendered, json!({"data": {"id": "ch-1"}, "cached": "stale"}));

        let mapped = Cached::new(2, CacheStatus::Fresh).map(|n| n * 2);
        assert_eq!(mapped, Cached::new(4, CacheStatus::Fresh));
    }
}
