//! Health check module
//! Provides health status for the application and its dependencies

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::cache::RedisPool;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: impl Into<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details: Some(details.into()),
        }
    }

    pub fn warning(details: impl Into<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms: None,
            details: Some(details.into()),
        }
    }
}

const CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// Aggregated checker over the service dependencies
#[derive(Clone)]
pub struct HealthChecker {
    db_pool: sqlx::PgPool,
    cache_pool: Option<RedisPool>,
}

impl HealthChecker {
    pub fn new(db_pool: sqlx::PgPool, cache_pool: Option<RedisPool>) -> Self {
        Self {
            db_pool,
            cache_pool,
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut checks = HashMap::new();

        checks.insert("database".to_string(), self.check_database().await);
        checks.insert("cache".to_string(), self.check_cache().await);

        // The database is load-bearing; the cache only degrades service
        let status = if checks["database"].status == ComponentState::Down {
            HealthState::Unhealthy
        } else if checks.values().any(|c| c.status != ComponentState::Up) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthStatus {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    async fn check_database(&self) -> ComponentHealth {
        let start = Instant::now();
        match timeout(CHECK_TIMEOUT, crate::database::health_check(&self.db_pool)).await {
            Ok(Ok(())) => ComponentHealth::up(Some(start.elapsed().as_millis())),
            Ok(Err(e)) => ComponentHealth::down(e.to_string()),
            Err(_) => ComponentHealth::down("database health check timed out"),
        }
    }

    async fn check_cache(&self) -> ComponentHealth {
        let pool = match &self.cache_pool {
            Some(pool) => pool,
            None => return ComponentHealth::warning("cache disabled; running store-only"),
        };

        let start = Instant::now();
        match timeout(CHECK_TIMEOUT, crate::cache::health_check(pool)).await {
            Ok(Ok(())) => ComponentHealth::up(Some(start.elapsed().as_millis())),
            Ok(Err(e)) => ComponentHealth::down(e.to_string()),
            Err(_) => ComponentHealth::down("cache health check timed out"),
        }
    }
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy | HealthState::Degraded)
    }
}
