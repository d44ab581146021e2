//! Cache store settings

use crate::error::{LmsError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for [`MemoryCacheStore`](super::MemoryCacheStore)
///
/// Entries live for `default_ttl` (spread by `ttl_jitter`), then stay readable
/// as stale for `stale_retention` before they are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub default_ttl: Duration,

    /// Window after expiry in which a read still returns the entry as stale
    pub stale_retention: Duration,

    /// Entry count bound; the least recently used entry goes first
    pub max_entries: usize,

    /// Bound on the summed size estimate of all values
    pub max_size_bytes: usize,

    /// Fraction of the TTL applied as random spread (0.0 - 1.0)
    pub ttl_jitter: f64,

    /// Run the background sweeper from `start_auto_cleanup`
    pub enable_auto_cleanup: bool,

    pub cleanup_interval: Duration,

    /// Evict by recency; otherwise the entry closest to expiry goes first
    pub enable_lru_eviction: bool,

    /// Track byte usage in `CacheStats`
    pub enable_metrics: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            stale_retention: Duration::from_secs(600),
            max_entries: 10_000,
            max_size_bytes: 100 * 1024 * 1024,
            ttl_jitter: 0.1,
            enable_auto_cleanup: true,
            cleanup_interval: Duration::from_secs(300),
            enable_lru_eviction: true,
            enable_metrics: true,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder {
            config: CacheConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let problem = if self.max_entries == 0 {
            Some("max_entries must be greater than 0")
        } else if self.max_size_bytes == 0 {
            Some("max_size_bytes must be greater than 0")
        } else if !(0.0..=1.0).contains(&self.ttl_jitter) {
            Some("ttl_jitter must be between 0.0 and 1.0")
        } else if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            Some("cleanup_interval must be greater than 0")
        } else {
            None
        };

        match problem {
            Some(msg) => Err(LmsError::Config(format!("cache: {}", msg))),
            None => Ok(()),
        }
    }

    /// `default_ttl` moved by up to `ttl_jitter` of itself in either direction,
    /// never below one second
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter <= 0.0 {
            return self.default_ttl;
        }

        let base = self.default_ttl.as_secs_f64();
        let spread = base * self.ttl_jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(1.0))
    }

    /// Short TTLs for catalogues that are being edited
    pub fn realtime() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            stale_retention: Duration::from_secs(120),
            max_entries: 5_000,
            max_size_bytes: 50 * 1024 * 1024,
            ttl_jitter: 0.15,
            cleanup_interval: Duration::from_secs(60),
            ..Default::default()
        }
    }

    /// Memory-constrained deployments
    pub fn small() -> Self {
        Self {
            default_ttl: Duration::from_secs(1800),
            max_entries: 1_000,
            max_size_bytes: 10 * 1024 * 1024,
            ..Default::default()
        }
    }
}

/// Builder over [`CacheConfig::default`]
#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// How long an expired entry remains readable as stale
    pub fn stale_retention(mut self, retention: Duration) -> Self {
        self.config.stale_retention = retention;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = max;
        self
    }

    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.config.max_size_bytes = size;
        self
    }

    /// Fraction of the TTL used as random spread; 0.0 disables it
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.config.ttl_jitter = jitter;
        self
    }

    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.config.enable_auto_cleanup = enable;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval;
        self
    }

    pub fn enable_lru_eviction(mut self, enable: bool) -> Self {
        self.config.enable_lru_eviction = enable;
        self
    }

    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.config.enable_metrics = enable;
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_suit_catalogue_reads() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl, Duration::from_secs(3600));
        assert_eq!(config.stale_retention, Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_limits() {
        let no_entries = CacheConfig::builder().max_entries(0).build();
        assert!(matches!(no_entries.validate(), Err(LmsError::Config(_))));

        let wild_jitter = CacheConfig::builder().ttl_jitter(1.5).build();
        assert!(wild_jitter.validate().is_err());

        let spinning_sweeper = CacheConfig::builder()
            .cleanup_interval(Duration::ZERO)
            .build();
        assert!(spinning_sweeper.validate().is_err());

        let no_sweeper = CacheConfig::builder()
            .enable_auto_cleanup(false)
            .cleanup_interval(Duration::ZERO)
            .build();
        assert!(no_sweeper.validate().is_ok());
    }

    #[test]
    fn test_builder_without_jitter_is_exact() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(600))
            .stale_retention(Duration::from_secs(30))
            .ttl_jitter(0.0)
            .build();

        assert_eq!(config.stale_retention, Duration::from_secs(30));
        assert_eq!(config.ttl_with_jitter(), Duration::from_secs(600));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = CacheConfig::builder()
            .default_ttl(Duration::from_secs(100))
            .ttl_jitter(0.2)
            .build();

        for _ in 0..50 {
            let secs = config.ttl_with_jitter().as_secs_f64();
            assert!((80.0..=120.0).contains(&secs));
        }
    }

    #[test]
    fn test_presets_validate() {
        assert!(CacheConfig::realtime().validate().is_ok());
        assert!(CacheConfig::small().validate().is_ok());
        assert!(CacheConfig::realtime().default_ttl < CacheConfig::small().default_ttl);
    }
}
