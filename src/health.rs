//! Readiness of the ledger database and the payment gateway.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::database;
use crate::payments::provider::PaymentGateway;

const DATABASE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Degraded still serves traffic: payments work, but something an operator
/// should know about is off (in-memory stores, missing gateway credentials).
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
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

impl HealthStatus {
    /// Overall state is the worst component state.
    pub fn from_checks(checks: HashMap<String, ComponentHealth>) -> Self {
        let status = if checks.values().any(|c| c.status == ComponentState::Down) {
            HealthState::Unhealthy
        } else if checks.values().any(|c| c.status == ComponentState::Warning) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    db_pool: Option<sqlx::PgPool>,
    gateway: Arc<dyn PaymentGateway>,
}

impl HealthChecker {
    pub fn new(db_pool: Option<sqlx::PgPool>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { db_pool, gateway }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut checks = HashMap::new();
        checks.insert("database".to_string(), self.check_database().await);
        checks.insert(format!("gateway:{}", self.gateway.name()), self.check_gateway());
        HealthStatus::from_checks(checks)
    }

    async fn check_database(&self) -> ComponentHealth {
        let Some(pool) = &self.db_pool else {
            return ComponentHealth::warning("In-memory stores");
        };

        match timeout(DATABASE_TIMEOUT, database::ping(pool)).await {
            Ok(Ok(elapsed_ms)) => ComponentHealth::up(Some(elapsed_ms)),
            Ok(Err(e)) => {
                error!("Database health check failed: {}", e);
                ComponentHealth::down(e.to_string())
            }
            Err(_) => {
                error!("Database health check timed out");
                ComponentHealth::down("Timeout")
            }
        }
    }

    fn check_gateway(&self) -> ComponentHealth {
        if self.gateway.is_configured() {
            ComponentHealth::up(None)
        } else {
            warn!(provider = self.gateway.name(), "Payment gateway not configured");
            ComponentHealth::warning("Credentials not configured")
        }
    }
}
