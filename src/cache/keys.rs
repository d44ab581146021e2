//! Cache key construction for catalogue resources
//!
//! Keys have the shape `base:k1=v1:k2=v2`. Parameters with null or empty
//! values are dropped and the rest are sorted by name, so the key for a
//! given parameter set does not depend on the order it was assembled in.

use crate::cache::types::CacheKey;
use crate::schema::ItemKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Resource type used as the key base
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Global course listing
    CourseList,
    /// Single course detail
    Course,
    /// Chapters of one course
    ChapterList,
    /// Single chapter detail (chapter plus its content)
    Chapter,
    /// Lectures and quizzes of one chapter
    ChapterContent,
    Lecture,
    Quiz,
    Custom(String),
}

impl ResourceKind {
    /// Resource holding a single item of `kind`
    pub fn for_item(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Chapter => ResourceKind::Chapter,
            ItemKind::Lecture => ResourceKind::Lecture,
            ItemKind::Quiz => ResourceKind::Quiz,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::CourseList => write!(f, "courses"),
            ResourceKind::Course => write!(f, "course"),
            ResourceKind::ChapterList => write!(f, "chapters"),
            ResourceKind::Chapter => write!(f, "chapter"),
            ResourceKind::ChapterContent => write!(f, "content"),
            ResourceKind::Lecture => write!(f, "lecture"),
            ResourceKind::Quiz => write!(f, "quiz"),
            ResourceKind::Custom(s) => write!(f, "{}", s),
        }
    }
}

/// Build a cache key from a base name and scalar parameters
///
/// Null values, empty strings, and non-scalar values are skipped. Remaining
/// parameters are rendered as `name=value` in name order.
pub fn build_key(base: &str, params: &Map<String, Value>) -> CacheKey {
    let mut builder = CacheKeyBuilder::new(ResourceKind::Custom(base.to_string()));
    for (name, value) in params {
        let rendered = match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        };
        builder = builder.opt_param(name.as_str(), rendered);
    }
    builder.build()
}

/// Cache key builder for catalogue resources
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    resource: ResourceKind,
    params: Vec<(String, String)>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder
    pub fn new(resource: ResourceKind) -> Self {
        Self {
            resource,
            params: Vec::new(),
        }
    }

    /// Add a parameter; empty values are ignored
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let value = value.to_string();
        if !value.is_empty() {
            self.params.push((key.into(), value));
        }
        self
    }

    /// Add a parameter only when present
    pub fn opt_param<V: ToString>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.param(key, value),
            None => self,
        }
    }

    /// Build the cache key
    pub fn build(mut self) -> CacheKey {
        let mut key = self.resource.to_string();
        // Stable sort keeps repeated names in insertion order
        self.params.sort_by(|a, b| a.0.cmp(&b.0));
        for (k, v) in &self.params {
            key.push(':');
            key.push_str(k);
            key.push('=');
            key.push_str(v);
        }
        key
    }
}

/// Keys for every cached catalogue read
pub struct CacheKeys;

impl CacheKeys {
    pub fn course_list() -> CacheKey {
        CacheKeyBuilder::new(ResourceKind::CourseList).build()
    }

    pub fn course(course_id: &str) -> CacheKey {
        CacheKeyBuilder::new(ResourceKind::Course)
            .param("id", course_id)
            .build()
    }

    pub fn chapter_list(course_id: &str) -> CacheKey {
        CacheKeyBuilder::new(ResourceKind::ChapterList)
            .param("course_id", course_id)
            .build()
    }

    pub fn chapter(chapter_id: &str) -> CacheKey {
        CacheKeyBuilder::new(ResourceKind::Chapter)
            .param("id", chapter_id)
            .build()
    }

    pub fn chapter_content(chapter_id: &str) -> CacheKey {
        CacheKeyBuilder::new(ResourceKind::ChapterContent)
            .param("chapter_id", chapter_id)
            .build()
    }

    pub fn item(kind: ItemKind, item_id: &str) -> CacheKey {
        CacheKeyBuilder::new(ResourceKind::for_item(kind))
            .param("id", item_id)
            .build()
    }
}
