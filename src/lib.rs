//! # LMS Core (lms-core)
//!
//! Ordering engine and read-through cache for a course catalogue made of
//! courses, chapters, lectures and quizzes, backed by Neo4j.
//!
//! ## Features
//!
//! - Contiguous `1..N` sibling ordering with partial pins and collision resolution
//! - Lectures and quizzes share one order sequence per chapter
//! - Only changed positions are written, one bulk statement per collection
//!   (the whole scope when versioning is off)
//! - Optimistic versioning on the parent aggregate
//! - Read-through cache with stale-while-revalidate and glob invalidation
//! - Transactions with bounded retries on transient store errors
//!
//! ## Reordering
//!
//! ```no_run
//! use lms_core::{AppConfig, Neo4jClient, OrderPin, OrderingEngine, SiblingScope};
//! use lms_core::store::ItemStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::from_env()?;
//!     let client = Neo4jClient::connect(&config.neo4j).await?;
//!     let store = client.item_store();
//!     let engine = OrderingEngine::new(config.ordering.clone());
//!
//!     let scope = SiblingScope::CourseChapters("course-1".to_string());
//!     let mut session = store.begin().await?;
//!     let outcome = engine
//!         .reorder(&store, &mut session, &scope, &[OrderPin::new("ch-3", 1)])
//!         .await?;
//!     store.commit(session).await?;
//!
//!     println!("{} chapters moved", outcome.written);
//!     Ok(())
//! }
//! ```
//!
//! ## Cached Reads
//!
//! ```no_run
//! use lms_core::cache::{MemoryCacheStore, ReadThroughCache};
//! use lms_core::curriculum::{AllowAll, CurriculumService};
//! use lms_core::store::MemoryItemStore;
//! use lms_core::{AppConfig, OrderingEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::default();
//!     let cache = ReadThroughCache::new(Arc::new(MemoryCacheStore::new(config.cache.clone())));
//!     let service = CurriculumService::new(
//!         Arc::new(MemoryItemStore::new()),
//!         OrderingEngine::new(config.ordering.clone()),
//!         config.transaction.clone(),
//!         Arc::new(AllowAll),
//!         cache,
//!     );
//!
//!     let chapters = service.list_chapters("course-1").await?;
//!     println!("{} chapters (cached: {})", chapters.data.len(), chapters.cached);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod curriculum;
pub mod error;
pub mod ordering;
pub mod schema;
pub mod store;
pub mod transaction;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheKeys, CacheStatus, Cached, InvalidationPlan, ReadThroughCache};
pub use config::{AppConfig, Neo4jSettings};
pub use connection::{HealthCheckConfig, HealthCheckResult, HealthStatus, Neo4jClient};
pub use curriculum::{ChapterDetail, CurriculumService, ItemUpdate, OwnershipCheck};
pub use error::{LmsError, Result};
pub use ordering::{resolve_ordering, OrderingConfig, OrderingEngine, OrderingOutcome};
pub use schema::{Actor, ItemKind, OrderPin, OrderedItem, ResolvedPosition, Role, SiblingScope};
pub use transaction::{with_transaction, TransactionConfig, UnitOfWork};
