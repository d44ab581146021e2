//! Neo4j connection management
//!
//! [`Neo4jClient`] owns the driver pool, sets up the catalogue schema and
//! reports database health for the admin tool.

use crate::config::Neo4jSettings;
use crate::error::{LmsError, Result};
use crate::store::Neo4jItemStore;
use chrono::{DateTime, Utc};
use neo4rs::{query, ConfigBuilder, Graph};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Schema statements applied by [`Neo4jClient::ensure_schema`]
const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE CONSTRAINT course_id IF NOT EXISTS FOR (c:Course) REQUIRE c.id IS UNIQUE",
    "CREATE CONSTRAINT chapter_id IF NOT EXISTS FOR (n:Chapter) REQUIRE n.id IS UNIQUE",
    "CREATE CONSTRAINT lecture_id IF NOT EXISTS FOR (n:Lecture) REQUIRE n.id IS UNIQUE",
    "CREATE CONSTRAINT quiz_id IF NOT EXISTS FOR (n:Quiz) REQUIRE n.id IS UNIQUE",
    "CREATE INDEX ordered_item_parent IF NOT EXISTS FOR (n:OrderedItem) ON (n.parent_id)",
];

/// Health probe settings
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Limit for a single probe
    pub timeout: Duration,
    /// Retries after the first failed probe
    pub max_retries: u32,
    /// Delay between probes
    pub retry_delay: Duration,
    /// Response time above which the database counts as degraded
    pub degraded_threshold_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            degraded_threshold_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Responsive but slower than the degraded threshold
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code equivalent
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }

    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Outcome of one health probe run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub database_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    pub retry_count: u32,
}

impl HealthCheckResult {
    fn healthy(
        response_time: Duration,
        database_name: Option<String>,
        degraded_threshold_ms: u64,
    ) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            response_time_ms,
            database_name,
            timestamp: Utc::now(),
            error: None,
            retry_count: 0,
        }
    }

    fn unhealthy(response_time: Duration, error: &str) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            database_name: None,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
            retry_count: 0,
        }
    }
}

/// Neo4j client with connection pooling
pub struct Neo4jClient {
    graph: Graph,
    database: String,
    health_config: HealthCheckConfig,
}

impl Neo4jClient {
    pub async fn connect(settings: &Neo4jSettings) -> Result<Self> {
        Self::with_config(settings, HealthCheckConfig::default()).await
    }

    pub async fn with_config(
        settings: &Neo4jSettings,
        health_config: HealthCheckConfig,
    ) -> Result<Self> {
        settings.validate()?;
        info!(
            "Connecting to Neo4j at {} (database: {})",
            settings.uri, settings.database
        );

        let config = ConfigBuilder::default()
            .uri(settings.uri.as_str())
            .user(settings.user.as_str())
            .password(settings.password.as_str())
            .db(settings.database.as_str())
            .fetch_size(500)
            .max_connections(16)
            .build()
            .map_err(|e| LmsError::Config(e.to_string()))?;

        let graph = Graph::connect(config)
            .await
            .map_err(|e| LmsError::Connection(e.to_string()))?;

        info!("Successfully connected to Neo4j");

        Ok(Self {
            graph,
            database: settings.database.clone(),
            health_config,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Item store sharing this client's pool
    pub fn item_store(&self) -> Neo4jItemStore {
        Neo4jItemStore::new(self.graph.clone())
    }

    /// Create uniqueness constraints and the sibling lookup index
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            self.graph
                .run(query(statement))
                .await
                .map_err(|e| LmsError::Query(format!("Failed to apply schema: {}", e)))?;
        }
        info!("Catalogue schema in place ({} statements)", SCHEMA_STATEMENTS.len());
        Ok(())
    }

    /// Probe with `RETURN 1`
    pub async fn health_check(&self) -> Result<bool> {
        debug!("Executing health check (RETURN 1)");

        let probe = self.graph.run(query("RETURN 1"));
        match tokio::time::timeout(self.health_config.timeout, probe).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(LmsError::Connection(e.to_string())),
            Err(_) => Err(LmsError::Timeout {
                timeout_ms: self.health_config.timeout.as_millis() as u64,
                context: "health check".to_string(),
            }),
        }
    }

    /// Probe and classify by response time; never returns an error
    pub async fn health_check_detailed(&self) -> HealthCheckResult {
        let start = Instant::now();

        match self.health_check().await {
            Ok(_) => HealthCheckResult::healthy(
                start.elapsed(),
                Some(self.database.clone()),
                self.health_config.degraded_threshold_ms,
            ),
            Err(e) => {
                error!("Health check failed: {}", e);
                HealthCheckResult::unhealthy(start.elapsed(), &e.to_string())
            }
        }
    }

    /// Detailed probe with retries
    pub async fn health_check_with_retry(&self) -> HealthCheckResult {
        let mut retry_count = 0;

        loop {
            let mut result = self.health_check_detailed().await;

            if result.status.is_operational() || retry_count >= self.health_config.max_retries {
                result.retry_count = retry_count;
                return result;
            }

            retry_count += 1;
            warn!(
                "Health check failed (attempt {}/{}), retrying after {:?}",
                retry_count,
                self.health_config.max_retries + 1,
                self.health_config.retry_delay
            );
            tokio::time::sleep(self.health_config.retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_status_http_codes() {
        assert_eq!(HealthStatus::Healthy.to_http_status_code(), 200);
        assert_eq!(HealthStatus::Degraded.to_http_status_code(), 200);
        assert_eq!(HealthStatus::Unhealthy.to_http_status_code(), 503);
        assert!(!HealthStatus::Unhealthy.is_operational());
    }

    #[test]
    fn test_degraded_threshold() {
        let fast = HealthCheckResult::healthy(Duration::from_millis(50), None, 1000);
        assert_eq!(fast.status, HealthStatus::Healthy);

        let slow = HealthCheckResult::healthy(Duration::from_millis(1500), None, 1000);
        assert_eq!(slow.status, HealthStatus::Degraded);
        assert_eq!(slow.response_time_ms, 1500);
    }

    #[test]
    fn test_unhealthy_result_serialization() {
        let result = HealthCheckResult::unhealthy(Duration::from_millis(10), "refused");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["error"], "refused");
    }
}
