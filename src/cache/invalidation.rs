//! Cache invalidation plans and events
//!
//! Writes never update cache entries in place. A committed mutation builds an
//! [`InvalidationPlan`] naming every key pattern that could have produced a
//! response touching the mutated aggregate, and the plan is applied on a
//! best-effort basis after commit.

use crate::cache::keys::CacheKeys;
use crate::schema::ItemKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Entry outlived its TTL and the stale retention window
    Expired,

    /// Removed by an explicit pattern
    Pattern { pattern: String },

    /// Removed because a write touched the named aggregate
    Mutation { aggregate: String },

    /// Evicted by LRU policy
    LeastRecentlyUsed,

    /// Whole cache cleared
    Cleared,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Expired => write!(f, "stale retention elapsed"),
            InvalidationReason::Pattern { pattern } => write!(f, "pattern match: {}", pattern),
            InvalidationReason::Mutation { aggregate } => {
                write!(f, "aggregate mutated: {}", aggregate)
            }
            InvalidationReason::LeastRecentlyUsed => write!(f, "LRU eviction"),
            InvalidationReason::Cleared => write!(f, "cache cleared"),
        }
    }
}

/// Set of glob patterns to clear after a committed write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationPlan {
    pub reason: InvalidationReason,
    pub patterns: Vec<String>,
}

impl InvalidationPlan {
    pub fn new(aggregate: impl Into<String>) -> Self {
        Self {
            reason: InvalidationReason::Mutation {
                aggregate: aggregate.into(),
            },
            patterns: Vec::new(),
        }
    }

    /// Clear `key` and every parameterised variant of it
    ///
    /// The `key:*` form keeps `course:id=1` from also clearing `course:id=12`.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        let scoped = format!("{}:*", key);
        if !self.patterns.contains(&key) {
            self.patterns.push(key);
        }
        if !self.patterns.contains(&scoped) {
            self.patterns.push(scoped);
        }
        self
    }

    /// Add a raw glob pattern
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        if !self.patterns.contains(&pattern) {
            self.patterns.push(pattern);
        }
        self
    }

    /// Course detail plus the global course listing
    pub fn course(self, course_id: &str) -> Self {
        self.key(CacheKeys::course(course_id))
            .key(CacheKeys::course_list())
    }

    /// A chapter write: its own detail and content, the course's chapter
    /// list, and the course aggregates above it
    pub fn for_chapter(course_id: &str, chapter_id: &str) -> Self {
        Self::new(format!("chapter:{}", chapter_id))
            .key(CacheKeys::chapter(chapter_id))
            .key(CacheKeys::chapter_content(chapter_id))
            .key(CacheKeys::chapter_list(course_id))
            .course(course_id)
    }

    /// A lecture or quiz write: the item, the owning chapter's list and
    /// detail, the course's chapter list, and the course aggregates
    pub fn for_content(course_id: &str, chapter_id: &str, kind: ItemKind, item_id: &str) -> Self {
        Self::new(format!("{}:{}", kind, item_id))
            .key(CacheKeys::item(kind, item_id))
            .key(CacheKeys::chapter_content(chapter_id))
            .key(CacheKeys::chapter(chapter_id))
            .key(CacheKeys::chapter_list(course_id))
            .course(course_id)
    }

    /// Also clear single-item keys for siblings whose order changed
    pub fn with_items<'a, I>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = (ItemKind, &'a str)>,
    {
        for (kind, id) in items {
            self = self.key(CacheKeys::item(kind, id));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Record of entries removed from the cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were invalidated
    pub keys: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_reason_display() {
        assert_eq!(InvalidationReason::Expired.to_string(), "stale retention elapsed");

        let reason = InvalidationReason::Mutation {
            aggregate: "chapter:ch-1".to_string(),
        };
        assert!(reason.to_string().contains("chapter:ch-1"));
    }

    #[test]
    fn test_key_adds_exact_and_scoped_patterns() {
        let plan = InvalidationPlan::new("course:c-1").key("course:id=c-1");
        assert_eq!(plan.patterns, vec!["course:id=c-1", "course:id=c-1:*"]);
    }

    #[test]
    fn test_content_plan_covers_every_aggregate() {
        let plan = InvalidationPlan::for_content("c-1", "ch-1", ItemKind::Lecture, "l-1");

        for expected in [
            "lecture:id=l-1",
            "content:chapter_id=ch-1",
            "chapter:id=ch-1",
            "chapters:course_id=c-1",
            "course:id=c-1",
            "courses",
            "courses:*",
        ] {
            assert!(
                plan.patterns.iter().any(|p| p == expected),
                "missing pattern {}",
                expected
            );
        }
    }

    #[test]
    fn test_plan_deduplicates_patterns() {
        let plan = InvalidationPlan::for_chapter("c-1", "ch-1")
            .key(CacheKeys::chapter("ch-1"))
            .with_items([(ItemKind::Chapter, "ch-1"), (ItemKind::Chapter, "ch-2")]);

        let count = plan
            .patterns
            .iter()
            .filter(|p| p.as_str() == "chapter:id=ch-1")
            .count();
        assert_eq!(count, 1);
        assert!(plan.patterns.iter().any(|p| p == "chapter:id=ch-2"));
    }

    #[test]
    fn test_invalidation_event() {
        let event = InvalidationEvent::new(
            InvalidationReason::Expired,
            vec!["key1".to_string(), "key2".to_string()],
        )
        .with_context("cleanup".to_string());

        assert_eq!(event.keys.len(), 2);
        assert_eq!(event.context, Some("cleanup".to_string()));
    }
}
