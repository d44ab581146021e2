//! Stored cache values and their lifetimes
//!
//! An entry moves through three phases: fresh until `expires_at`, stale
//! for the store's retention window after that, then gone.

use crate::cache::types::{CacheKey, CacheValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed per-entry overhead added to the size estimate
const ENTRY_OVERHEAD_BYTES: usize = std::mem::size_of::<CacheMetadata>();

/// Longest span an entry can live or be retained
const MAX_SPAN_DAYS: i64 = 365 * 1000;

fn chrono_span(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration)
        .ok()
        .filter(|span| span.num_days() < MAX_SPAN_DAYS)
        .unwrap_or_else(|| chrono::Duration::days(MAX_SPAN_DAYS))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: CacheValue,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Entry written now that expires after `ttl`
    pub fn new(key: CacheKey, value: CacheValue, ttl: Duration) -> Self {
        let written_at = Utc::now();
        let expires_at = written_at
            .checked_add_signed(chrono_span(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key,
            value,
            metadata: CacheMetadata {
                written_at,
                accessed_at: written_at,
                expires_at,
                reads: 0,
                size_bytes: 0,
            },
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.metadata.expires_at
    }

    /// Expired and outside the stale window as well
    pub fn is_past_retention(&self, retention: Duration) -> bool {
        match self.metadata.expires_at.checked_add_signed(chrono_span(retention)) {
            Some(deadline) => Utc::now() >= deadline,
            None => false,
        }
    }

    /// Seconds left before expiry, rounded up while positive
    ///
    /// Zero or negative once expired; this is what readers see as stale.
    pub fn remaining_ttl_secs(&self) -> i64 {
        let ms = (self.metadata.expires_at - Utc::now()).num_milliseconds();
        if ms > 0 {
            (ms + 999) / 1000
        } else {
            ms / 1000
        }
    }

    pub fn mark_accessed(&mut self) {
        self.metadata.accessed_at = Utc::now();
        self.metadata.reads += 1;
    }

    /// Rough footprint: key, rendered JSON and bookkeeping
    pub fn calculate_size(&self) -> usize {
        self.key.len() + self.value.to_string().len() + ENTRY_OVERHEAD_BYTES
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub written_at: DateTime<Utc>,
    /// Last read, for LRU bookkeeping
    pub accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reads: u64,
    /// Filled in by the store on insert
    pub size_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread::sleep;

    fn entry(ttl: Duration) -> CacheEntry {
        CacheEntry::new("chapter:id=ch-1".to_string(), json!({"title": "Intro"}), ttl)
    }

    #[test]
    fn test_fresh_entry_reports_full_ttl() {
        let entry = entry(Duration::from_secs(3600));

        assert!(!entry.is_expired());
        assert!((3599..=3600).contains(&entry.remaining_ttl_secs()));
    }

    #[test]
    fn test_sub_second_ttl_rounds_up_then_goes_stale() {
        let entry = entry(Duration::from_millis(100));
        assert_eq!(entry.remaining_ttl_secs(), 1);

        sleep(Duration::from_millis(150));
        assert!(entry.is_expired());
        assert!(entry.remaining_ttl_secs() <= 0);
    }

    #[test]
    fn test_retention_window() {
        let entry = entry(Duration::ZERO);

        assert!(entry.is_expired());
        assert!(!entry.is_past_retention(Duration::from_secs(60)));
        assert!(entry.is_past_retention(Duration::ZERO));
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let entry = entry(Duration::from_secs(u64::MAX));
        assert!(!entry.is_expired());
        assert!(!entry.is_past_retention(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_reads_are_counted() {
        let mut entry = entry(Duration::from_secs(60));
        let written = entry.metadata.accessed_at;

        sleep(Duration::from_millis(5));
        entry.mark_accessed();
        entry.mark_accessed();

        assert_eq!(entry.metadata.reads, 2);
        assert!(entry.metadata.accessed_at > written);
        assert!(entry.calculate_size() > entry.key.len());
    }
}
