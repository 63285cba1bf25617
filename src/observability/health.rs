use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use crate::cache::CacheStore;
use crate::database::DocumentStore;

/// Health status of individual components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub last_check: chrono::DateTime<chrono::Utc>,
    pub message: Option<String>,
    pub response_time_ms: Option<f64>,
}

/// Overall health status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Result of one health pass over both backing stores
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
    pub components: HashMap<String, ComponentHealth>,
    pub uptime_seconds: u64,
}

/// Probes the cache store and the document store.
///
/// A failing cache store only degrades the service, since reads fall through
/// to the document store; a failing document store makes it unhealthy.
#[derive(Clone)]
pub struct HealthChecker {
    cache: Arc<dyn CacheStore>,
    documents: Arc<dyn DocumentStore>,
    started: Instant,
}

impl HealthChecker {
    pub fn new(cache: Arc<dyn CacheStore>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            cache,
            documents,
            started: Instant::now(),
        }
    }

    /// Check both stores in parallel
    pub async fn check(&self) -> HealthReport {
        let (cache_health, document_health) = tokio::join!(
            probe(self.cache.health_check(), HealthStatus::Degraded),
            probe(self.documents.health_check(), HealthStatus::Unhealthy),
        );

        let mut components = HashMap::new();
        components.insert("cache_store".to_string(), cache_health);
        components.insert("document_store".to_string(), document_health);

        HealthReport {
            status: overall_status(&components),
            timestamp: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            components,
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }
}

async fn probe<F>(check: F, failure: HealthStatus) -> ComponentHealth
where
    F: std::future::Future<Output = crate::error::CacheResult<()>>,
{
    let start = Instant::now();
    match check.await {
        Ok(()) => ComponentHealth {
            status: HealthStatus::Healthy,
            last_check: chrono::Utc::now(),
            message: None,
            response_time_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
        },
        Err(e) => ComponentHealth {
            status: failure,
            last_check: chrono::Utc::now(),
            message: Some(e.to_string()),
            response_time_ms: None,
        },
    }
}

/// Calculate overall health status based on component health
fn overall_status(components: &HashMap<String, ComponentHealth>) -> HealthStatus {
    let mut has_degraded = false;

    for health in components.values() {
        match health.status {
            HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
            HealthStatus::Degraded => has_degraded = true,
            HealthStatus::Healthy => {}
        }
    }

    if has_degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
