//! Cache store interface and the in-process implementation

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason},
    pattern::glob_match,
    types::{CacheHit, CacheKey, CacheStats, CacheValue},
};
use crate::error::{LmsError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Namespaced key-value store with TTL and pattern delete
///
/// Any backend works (in-process map, external cache server). Callers hold
/// it as `Arc<dyn CacheStore>`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up a key. `None` on miss; a hit carries the remaining TTL,
    /// which is zero or negative for a stale-but-retained entry.
    async fn get(&self, key: &str) -> Result<Option<CacheHit>>;

    /// Store a value with the default TTL, overwriting any existing entry
    async fn set(&self, key: &str, value: CacheValue) -> Result<()>;

    /// Store a value with an explicit TTL
    async fn set_with_ttl(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<()>;

    /// Delete every key matching a glob pattern, returning the count removed
    async fn invalidate(&self, pattern: &str) -> Result<usize>;

    /// Remove a single key
    async fn remove(&self, key: &str) -> Result<Option<CacheValue>>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    /// Snapshot of the store's counters
    async fn stats(&self) -> CacheStats;
}

/// In-process cache with TTL, stale retention, and LRU eviction
///
/// - Thread-safe async access via RwLock
/// - Expired entries stay readable (as stale) for `stale_retention`
/// - LRU eviction when entry or size limits are reached
/// - Can be switched offline to exercise fail-open paths
pub struct MemoryCacheStore {
    /// Cache configuration
    pub(crate) config: CacheConfig,

    /// Internal storage
    store: RwLock<StoreState>,

    /// When false every operation fails with `CacheUnavailable`
    available: AtomicBool,
}

/// Internal cache storage
struct StoreState {
    /// Main storage: key -> entry
    entries: HashMap<CacheKey, CacheEntry>,

    /// LRU tracking: maintains access order
    lru_queue: VecDeque<CacheKey>,

    /// Current cache statistics
    stats: CacheStats,

    /// Total size of cached data in bytes
    current_size_bytes: usize,
}

impl StoreState {
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        self.current_size_bytes = self
            .current_size_bytes
            .saturating_sub(entry.metadata.size_bytes);
        self.stats.entries = self.entries.len();
        Some(entry)
    }

    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }
}

impl MemoryCacheStore {
    /// Create a new cache with the given configuration
    pub fn new(config: CacheConfig) -> Self {
        info!("Initializing in-memory cache store with config: {:?}", config);

        Self {
            config,
            store: RwLock::new(StoreState {
                entries: HashMap::new(),
                lru_queue: VecDeque::new(),
                stats: CacheStats::default(),
                current_size_bytes: 0,
            }),
            available: AtomicBool::new(true),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Simulate the backing store going offline or coming back
    pub fn set_available(&self, available: bool) {
        if !available {
            warn!("Cache store marked unavailable");
        }
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LmsError::CacheUnavailable(
                "in-memory cache store is offline".to_string(),
            ))
        }
    }

    /// Remove all entries past their stale retention window
    pub async fn cleanup_expired(&self) -> Result<Vec<InvalidationEvent>> {
        self.ensure_available()?;
        let mut store = self.store.write().await;
        let retention = self.config.stale_retention;

        let expired_keys: Vec<CacheKey> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_past_retention(retention))
            .map(|(key, _)| key.clone())
            .collect();

        if expired_keys.is_empty() {
            return Ok(Vec::new());
        }

        for key in &expired_keys {
            store.remove_entry(key);
        }
        store.stats.evictions_ttl += expired_keys.len() as u64;

        debug!("Cleaned up {} expired entries", expired_keys.len());
        let count = expired_keys.len();
        Ok(vec![InvalidationEvent::new(InvalidationReason::Expired, expired_keys)
            .with_context(format!("Cleaned up {} expired entries", count))])
    }

    /// Get number of entries in cache
    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    /// Keys currently stored, in no particular order
    pub async fn keys(&self) -> Vec<CacheKey> {
        self.store.read().await.entries.keys().cloned().collect()
    }

    async fn insert_entry(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<()> {
        self.ensure_available()?;

        let mut entry = CacheEntry::new(key.to_string(), value, ttl);
        entry.metadata.size_bytes = entry.calculate_size();
        let size = entry.metadata.size_bytes;

        if size > self.config.max_size_bytes {
            warn!(key, size, "Entry larger than the whole cache, not stored");
            return Err(LmsError::Other(format!(
                "cache entry {} exceeds max_size_bytes",
                key
            )));
        }

        let mut store = self.store.write().await;

        // Overwrite unconditionally: drop the old entry first
        if store.remove_entry(key).is_some() {
            debug!("Replacing cache entry: {}", key);
        }

        self.evict_if_needed(&mut store, size);

        store.entries.insert(key.to_string(), entry);
        store.lru_queue.push_back(key.to_string());
        store.current_size_bytes += size;
        self.update_stats(&mut store);

        debug!("Stored cache entry: {} (ttl: {:?})", key, ttl);
        Ok(())
    }

    /// Evict least recently used entries until one more of `needed_size` fits
    fn evict_if_needed(&self, store: &mut StoreState, needed_size: usize) {
        while store.entries.len() >= self.config.max_entries
            || store.current_size_bytes + needed_size > self.config.max_size_bytes
        {
            let victim = if self.config.enable_lru_eviction {
                store.lru_queue.pop_front()
            } else {
                // Without LRU, evict whatever expires first
                store
                    .entries
                    .values()
                    .min_by_key(|e| e.metadata.expires_at)
                    .map(|e| e.key.clone())
            };

            match victim {
                Some(key) => {
                    debug!("Evicting entry due to cache limits: {}", key);
                    store.remove_entry(&key);
                    store.stats.evictions_size += 1;
                }
                None => break,
            }
        }
    }

    fn update_stats(&self, store: &mut StoreState) {
        store.stats.entries = store.entries.len();
        if self.config.enable_metrics {
            store.stats.size_bytes = store.current_size_bytes;
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheHit>> {
        self.ensure_available()?;
        let mut store = self.store.write().await;
        let retention = self.config.stale_retention;

        let past_retention = match store.entries.get(key) {
            None => {
                debug!("Cache miss: {}", key);
                store.stats.misses += 1;
                return Ok(None);
            }
            Some(entry) => entry.is_past_retention(retention),
        };

        if past_retention {
            debug!("Cache entry past stale retention: {}", key);
            store.remove_entry(key);
            store.stats.misses += 1;
            store.stats.evictions_ttl += 1;
            return Ok(None);
        }

        let hit = match store.entries.get_mut(key) {
            Some(entry) => {
                entry.mark_accessed();
                CacheHit {
                    value: entry.value.clone(),
                    remaining_ttl_secs: entry.remaining_ttl_secs(),
                }
            }
            None => return Ok(None),
        };

        if hit.is_fresh() {
            store.stats.hits += 1;
            debug!("Cache hit: {} (ttl: {}s)", key, hit.remaining_ttl_secs);
        } else {
            store.stats.stale_hits += 1;
            debug!("Stale cache hit: {} (ttl: {}s)", key, hit.remaining_ttl_secs);
        }

        if self.config.enable_lru_eviction {
            store.touch(key);
        }

        Ok(Some(hit))
    }

    async fn set(&self, key: &str, value: CacheValue) -> Result<()> {
        let ttl = self.config.ttl_with_jitter();
        self.insert_entry(key, value, ttl).await
    }

    async fn set_with_ttl(&self, key: &str, value: CacheValue, ttl: Duration) -> Result<()> {
        self.insert_entry(key, value, ttl).await
    }

    async fn invalidate(&self, pattern: &str) -> Result<usize> {
        self.ensure_available()?;
        let mut store = self.store.write().await;

        let keys_to_remove: Vec<CacheKey> = store
            .entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();

        for key in &keys_to_remove {
            store.remove_entry(key);
        }

        let removed = keys_to_remove.len();
        store.stats.invalidations += removed as u64;
        self.update_stats(&mut store);

        if removed > 0 {
            debug!("Invalidated {} entries matching pattern: {}", removed, pattern);
        }
        Ok(removed)
    }

    async fn remove(&self, key: &str) -> Result<Option<CacheValue>> {
        self.ensure_available()?;
        let mut store = self.store.write().await;

        match store.remove_entry(key) {
            Some(entry) => {
                store.stats.invalidations += 1;
                debug!("Removed cache entry: {}", key);
                Ok(Some(entry.value))
            }
            None => Ok(None),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_available()?;
        let mut store = self.store.write().await;

        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();
        store.current_size_bytes = 0;
        store.stats.entries = 0;
        store.stats.size_bytes = 0;
        store.stats.invalidations += count as u64;

        info!("Cleared {} entries from cache", count);
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        self.store.read().await.stats.clone()
    }
}

/// Background task that sweeps entries past their retention window
pub async fn start_auto_cleanup(cache: Arc<MemoryCacheStore>) {
    let interval = cache.config.cleanup_interval;

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;

        match cache.cleanup_expired().await {
            Ok(events) => {
                if !events.is_empty() {
                    debug!("Auto cleanup: {} events", events.len());
                }
            }
            Err(e) => {
                warn!("Auto cleanup failed: {}", e);
            }
        }
    }
}
