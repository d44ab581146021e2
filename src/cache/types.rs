//! Core type definitions for the cache system

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Cache key type - `base:param=value:...`
pub type CacheKey = String;

/// Cache value type - an arbitrary JSON payload
pub type CacheValue = serde_json::Value;

/// A cache hit together with the remaining TTL at read time
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub value: CacheValue,
    /// Seconds until expiry; zero or negative means stale but retained
    pub remaining_ttl_secs: i64,
}

impl CacheHit {
    pub fn is_fresh(&self) -> bool {
        self.remaining_ttl_secs > 0
    }

    pub fn is_stale(&self) -> bool {
        !self.is_fresh()
    }
}

/// Freshness marker attached to every read-through response
///
/// Serialized as `true` (fresh hit), `"stale"` (stale hit, refresh
/// running in the background) or `false` (loaded from the store).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Fresh,
    Stale,
    Miss,
}

impl Serialize for CacheStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CacheStatus::Fresh => serializer.serialize_bool(true),
            CacheStatus::Stale => serializer.serialize_str("stale"),
            CacheStatus::Miss => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for CacheStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Label(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(CacheStatus::Fresh),
            Raw::Flag(false) => Ok(CacheStatus::Miss),
            Raw::Label(label) if label == "stale" => Ok(CacheStatus::Stale),
            Raw::Label(other) => Err(de::Error::custom(format!(
                "unknown cache status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheStatus::Fresh => write!(f, "fresh"),
            CacheStatus::Stale => write!(f, "stale"),
            CacheStatus::Miss => write!(f, "miss"),
        }
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Hits with positive remaining TTL
    pub hits: u64,

    /// Hits on expired-but-retained entries
    pub stale_hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Total size of cached data in bytes
    pub size_bytes: usize,

    /// Number of evictions due to entry/size limits
    pub evictions_size: u64,

    /// Number of evictions after the stale retention window
    pub evictions_ttl: u64,

    /// Number of entries removed by pattern invalidation
    pub invalidations: u64,
}

impl CacheStats {
    /// Hit rate as a percentage, counting stale hits as hits
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits + self.stale_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_size + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, stale_hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, invalidations: {}, evictions: {} }}",
            self.hits,
            self.stale_hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.invalidations,
            self.total_evictions()
        )
    }
}
