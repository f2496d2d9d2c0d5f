use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::store::KeyValueStore;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

static START_TIME: std::sync::LazyLock<SystemTime> = std::sync::LazyLock::new(SystemTime::now);

pub struct HealthChecker {
    store: Arc<dyn KeyValueStore>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = now.duration_since(*START_TIME).unwrap_or_default().as_secs();

        let store_status = self.check_store().await;

        // Locks refuse to run without the store, so there is no degraded mode.
        let overall_status = if store_status.status == "healthy" {
            "healthy"
        } else {
            "unhealthy"
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            dependencies: DependencyStatus {
                store: store_status,
            },
        }
    }

    async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ServiceStatus {
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(e) => ServiceStatus {
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GuardError, GuardResult};
    use crate::store::{MemoryStore, ScriptReply, StoreScript};
    use async_trait::async_trait;
    use std::time::Duration;

    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        async fn get(&self, _: &str) -> GuardResult<Option<String>> {
            Err(down())
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> GuardResult<()> {
            Err(down())
        }
        async fn set_nx(&self, _: &str, _: &str, _: Duration) -> GuardResult<bool> {
            Err(down())
        }
        async fn del(&self, _: &str) -> GuardResult<bool> {
            Err(down())
        }
        async fn incr_by(&self, _: &str, _: i64) -> GuardResult<i64> {
            Err(down())
        }
        async fn expire(&self, _: &str, _: Duration) -> GuardResult<bool> {
            Err(down())
        }
        async fn ttl(&self, _: &str) -> GuardResult<Option<Duration>> {
            Err(down())
        }
        async fn sadd(&self, _: &str, _: &str) -> GuardResult<bool> {
            Err(down())
        }
        async fn srem(&self, _: &str, _: &str) -> GuardResult<bool> {
            Err(down())
        }
        async fn smembers(&self, _: &str) -> GuardResult<Vec<String>> {
            Err(down())
        }
        async fn eval(&self, _: StoreScript, _: &[String], _: &[String]) -> GuardResult<ScriptReply> {
            Err(down())
        }
        async fn ping(&self) -> GuardResult<()> {
            Err(down())
        }
    }

    fn down() -> GuardError {
        GuardError::StoreUnavailable("connection refused".into())
    }

    #[test]
    fn test_health_status_serialization() {
        let status = HealthStatus {
            status: "healthy".to_string(),
            timestamp: 1234567890,
            version: "1.0.0".to_string(),
            uptime_seconds: 3600,
            dependencies: DependencyStatus {
                store: ServiceStatus {
                    status: "healthy".to_string(),
                    response_time_ms: 5,
                    error: None,
                },
            },
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("1234567890"));
    }

    #[tokio::test]
    async fn test_memory_store_is_healthy() {
        let checker = HealthChecker::new(Arc::new(MemoryStore::new()));
        let status = checker.check_health().await;
        assert_eq!(status.status, "healthy");
        assert!(status.dependencies.store.error.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unhealthy() {
        let checker = HealthChecker::new(Arc::new(DownStore));
        let status = checker.check_health().await;
        assert_eq!(status.status, "unhealthy");
        assert_eq!(status.dependencies.store.status, "unavailable");
        assert!(status
            .dependencies
            .store
            .error
            .unwrap()
            .contains("connection refused"));
    }
}
