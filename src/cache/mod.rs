//! # Catalogue Read Cache
//!
//! Read-through caching for course, chapter and content reads, with
//! stale-while-revalidate and pattern invalidation on writes.
//!
//! ## Features
//!
//! - **Pluggable Store**: any [`CacheStore`] works; [`MemoryCacheStore`] ships in-process
//! - **Stale Serving**: expired entries stay readable for a retention window
//!   while a background task refreshes them
//! - **Order-Independent Keys**: parameters are sorted before they are joined
//! - **Pattern Invalidation**: glob patterns with `*` and `?`
//! - **Fail-Open**: a cache outage only makes reads slower
//!
//! ## Example
//!
//! ```rust
//! use lms_core::cache::{CacheConfig, CacheKeys, MemoryCacheStore, ReadThroughCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> lms_core::Result<()> {
//! let store = Arc::new(MemoryCacheStore::new(
//!     CacheConfig::builder()
//!         .default_ttl(Duration::from_secs(600))
//!         .max_entries(10_000)
//!         .build(),
//! ));
//! let cache = ReadThroughCache::new(store);
//!
//! let chapters = cache
//!     .fetch(&CacheKeys::chapter_list("c-1"), || async {
//!         Ok(vec!["Intro".to_string()])
//!     })
//!     .await?;
//! println!("{:?} (cached: {})", chapters.data, chapters.cached);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod keys;
pub mod pattern;
pub mod read_through;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::{CacheEntry, CacheMetadata};
pub use invalidation::{InvalidationEvent, InvalidationPlan, InvalidationReason};
pub use keys::{build_key, CacheKeyBuilder, CacheKeys, ResourceKind};
pub use pattern::glob_match;
pub use read_through::{Cached, ReadThroughCache, RefreshStats};
pub use store::{start_auto_cleanup, CacheStore, MemoryCacheStore};
pub use types::{CacheHit, CacheKey, CacheStats, CacheStatus, CacheValue};
