//! Error types for ordering, caching and store operations
//!
//! A single error enum covers the whole crate. Callers map it to transport
//! responses through [`LmsError::http_status`].

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum LmsError {
    /// Parent aggregate or one or more items do not exist
    ///
    /// `parent` is `None` for top-level courses and for lookups by id alone.
    #[error("{entity} not found: [{}]{}", .ids.join(", "), parent_suffix(.parent))]
    NotFound {
        entity: String,
        ids: Vec<String>,
        parent: Option<String>,
    },

    /// Malformed request (non-positive order, missing fields, duplicate pins)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Concurrent modification detected on a parent's ordering
    #[error("Ordering of {parent} changed concurrently (expected version {expected}, found {found})")]
    Conflict {
        parent: String,
        expected: i64,
        found: i64,
    },

    /// Caller does not own the parent aggregate
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Retryable read/write failure in the item store
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Cache store unreachable; never surfaced past the read-through layer
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(String),

    /// Connection error - network or connection pool issues
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms: {context}")]
    Timeout { timeout_ms: u64, context: String },

    /// Commit did not answer in time and may still have been applied
    #[error("Commit outcome unknown after {timeout_ms}ms")]
    CommitUnknown { timeout_ms: u64 },

    /// Neo4rs driver error (wrapper)
    #[error("Neo4rs driver error: {0}")]
    Driver(#[from] neo4rs::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for crate operations
pub type Result<T> = std::result::Result<T, LmsError>;

fn parent_suffix(parent: &Option<String>) -> String {
    match parent {
        Some(parent) => format!(" (parent: {})", parent),
        None => String::new(),
    }
}

impl LmsError {
    /// Shorthand for items missing under a known parent
    pub fn not_found(entity: &str, ids: Vec<String>, parent: &str) -> Self {
        LmsError::NotFound {
            entity: entity.to_string(),
            ids,
            parent: Some(parent.to_string()),
        }
    }

    /// Shorthand for an entity looked up by id alone
    pub fn missing(entity: &str, id: &str) -> Self {
        LmsError::NotFound {
            entity: entity.to_string(),
            ids: vec![id.to_string()],
            parent: None,
        }
    }

    /// Whether the enclosing transaction may be retried
    ///
    /// [`LmsError::CommitUnknown`] is not: the work may already be applied.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LmsError::TransientStore(_) | LmsError::Timeout { .. } | LmsError::Connection(_)
        )
    }

    /// HTTP status code equivalent
    pub fn http_status(&self) -> u16 {
        match self {
            LmsError::NotFound { .. } => 404,
            LmsError::Validation(_) => 400,
            LmsError::Conflict { .. } => 409,
            LmsError::Forbidden(_) => 403,
            LmsError::TransientStore(_)
            | LmsError::CacheUnavailable(_)
            | LmsError::Connection(_)
            | LmsError::Timeout { .. } => 503,
            LmsError::CommitUnknown { .. } => 504,
            _ => 500,
        }
    }
}

impl From<String> for LmsError {
    fn from(s: String) -> Self {
        LmsError::Other(s)
    }
}

impl From<&str> for LmsError {
    fn from(s: &str) -> Self {
        LmsError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for LmsError {
    fn from(e: serde_json::Error) -> Self {
        LmsError::Serialization(e.to_string())
    }
}
