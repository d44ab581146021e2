//! Application configuration from environment variables
//!
//! A `.env` file in the working directory is loaded first when present.
//!
//! | Variable                          | Default                  |
//! |-----------------------------------|--------------------------|
//! | `NEO4J_URI`                       | `bolt://localhost:7687`  |
//! | `NEO4J_USER`                      | `neo4j`                  |
//! | `NEO4J_PASSWORD`                  | `password`               |
//! | `NEO4J_DATABASE`                  | `neo4j`                  |
//! | `LMS_CACHE_TTL_SECS`              | `3600`                   |
//! | `LMS_CACHE_STALE_RETENTION_SECS`  | `600`                    |
//! | `LMS_CACHE_MAX_ENTRIES`           | `10000`                  |
//! | `LMS_TXN_MAX_RETRIES`             | `3`                      |
//! | `LMS_TXN_TIMEOUT_MS`              | `10000`                  |
//! | `LMS_OPTIMISTIC_ORDERING`         | `true`                   |

use crate::cache::CacheConfig;
use crate::error::{LmsError, Result};
use crate::ordering::OrderingConfig;
use crate::transaction::TransactionConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Neo4j connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jSettings {
    pub uri: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub database: String,
}

impl Default for Neo4jSettings {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "password".to_string(),
            database: "neo4j".to_string(),
        }
    }
}

impl Neo4jSettings {
    pub fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            return Err(LmsError::Config("NEO4J_URI must not be empty".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(LmsError::Config("NEO4J_DATABASE must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Complete configuration for the catalogue core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub neo4j: Neo4jSettings,
    pub cache: CacheConfig,
    pub transaction: TransactionConfig,
    pub ordering: OrderingConfig,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = AppConfig::default();
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let neo4j = Neo4jSettings {
            uri: text("NEO4J_URI", &defaults.neo4j.uri),
            user: text("NEO4J_USER", &defaults.neo4j.user),
            password: text("NEO4J_PASSWORD", &defaults.neo4j.password),
            database: text("NEO4J_DATABASE", &defaults.neo4j.database),
        };

        let mut cache = defaults.cache.clone();
        if let Some(secs) = parse_var::<u64, _>(&lookup, "LMS_CACHE_TTL_SECS")? {
            cache.default_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "LMS_CACHE_STALE_RETENTION_SECS")? {
            cache.stale_retention = Duration::from_secs(secs);
        }
        if let Some(max) = parse_var::<usize, _>(&lookup, "LMS_CACHE_MAX_ENTRIES")? {
            cache.max_entries = max;
        }

        let mut transaction = defaults.transaction.clone();
        if let Some(retries) = parse_var::<u32, _>(&lookup, "LMS_TXN_MAX_RETRIES")? {
            transaction.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "LMS_TXN_TIMEOUT_MS")? {
            transaction.timeout = Duration::from_millis(ms);
        }

        let mut ordering = defaults.ordering;
        if let Some(flag) = parse_var::<bool, _>(&lookup, "LMS_OPTIMISTIC_ORDERING")? {
            ordering.optimistic_concurrency = flag;
        }

        let config = Self {
            neo4j,
            cache,
            transaction,
            ordering,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.neo4j.validate()?;
        self.cache.validate()?;
        self.transaction.validate()?;
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| LmsError::Config(format!("{} has invalid value {:?}: {}", name, raw, e))),
    }
}
