use crate::memory::{MemorySource, ProcMemorySource};
use crate::snapshot::{DatabaseHealth, DatabaseStatus, HealthSnapshot, HealthStatus, MemoryHealth};
use chrono::Utc;
use database::DatabaseProbe;
use std::sync::Arc;
use tokio::time::Instant;

/// Memory usage above this percentage makes the service unhealthy.
pub const MEMORY_PRESSURE_THRESHOLD: u32 = 90;

/// Produces a `HealthSnapshot` on demand from a database probe and a memory source.
#[derive(Clone)]
pub struct HealthAggregator {
    probe: Arc<dyn DatabaseProbe>,
    memory: Arc<dyn MemorySource>,
    started: Instant,
}

impl HealthAggregator {
    /// Uses `/proc` for memory. Uptime counts from this call.
    pub fn new(probe: Arc<dyn DatabaseProbe>) -> Self {
        Self::with_memory_source(probe, Arc::new(ProcMemorySource))
    }

    pub fn with_memory_source(probe: Arc<dyn DatabaseProbe>, memory: Arc<dyn MemorySource>) -> Self {
        Self {
            probe,
            memory,
            started: Instant::now(),
        }
    }

    /// Probes the database once and samples memory. Never fails.
    pub async fn check_health(&self) -> HealthSnapshot {
        let database = match self.probe.probe().await {
            Ok(latency) => DatabaseHealth {
                status: DatabaseStatus::Connected,
                latency: latency.as_millis() as u64,
            },
            Err(e) => {
                tracing::warn!(error = %e, "Health check: database unreachable");
                DatabaseHealth {
                    status: DatabaseStatus::Disconnected,
                    latency: 0,
                }
            }
        };

        let usage = self.memory.sample();
        let memory = MemoryHealth {
            used: usage.used_mb(),
            total: usage.total_mb(),
            percentage: usage.percentage(),
        };

        let status = if database.status == DatabaseStatus::Disconnected
            || memory.percentage > MEMORY_PRESSURE_THRESHOLD
        {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };

        HealthSnapshot {
            status,
            timestamp: Utc::now(),
            uptime: self.started.elapsed().as_secs(),
            memory,
            database,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryUsage;
    use async_trait::async_trait;
    use database::{ConnectionState, DbError};
    use std::time::Duration;

    struct FakeProbe(Option<Duration>);

    #[async_trait]
    impl DatabaseProbe for FakeProbe {
        async fn probe(&self) -> Result<Duration, DbError> {
            self.0.ok_or(DbError::NotConnected(ConnectionState::Failed))
        }
    }

    struct FakeMemory(MemoryUsage);

    impl MemorySource for FakeMemory {
        fn sample(&self) -> MemoryUsage {
            self.0
        }
    }

    const MB: u64 = 1024 * 1024;

    fn aggregator(latency: Option<Duration>, used_mb: u64, total_mb: u64) -> HealthAggregator {
        HealthAggregator::with_memory_source(
            Arc::new(FakeProbe(latency)),
            Arc::new(FakeMemory(MemoryUsage {
                used_bytes: used_mb * MB,
                total_bytes: total_mb * MB,
            })),
        )
    }

    #[tokio::test]
    async fn healthy_when_connected_and_memory_is_low() {
        let snapshot = aggregator(Some(Duration::from_millis(3)), 100, 1000).check_health().await;
        assert!(snapshot.is_healthy());
        assert_eq!(snapshot.database.status, DatabaseStatus::Connected);
        assert_eq!(snapshot.database.latency, 3);
        assert_eq!(snapshot.memory.used, 100);
        assert_eq!(snapshot.memory.total, 1000);
        assert_eq!(snapshot.memory.percentage, 10);
    }

    #[tokio::test]
    async fn disconnected_store_is_unhealthy_even_without_memory_pressure() {
        let snapshot = aggregator(None, 0, 1000).check_health().await;
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
        assert_eq!(snapshot.database.status, DatabaseStatus::Disconnected);
        assert_eq!(snapshot.database.latency, 0);
        assert_eq!(snapshot.memory.percentage, 0);
    }

    #[tokio::test]
    async fn memory_pressure_is_unhealthy_even_with_a_live_store() {
        let snapshot = aggregator(Some(Duration::from_millis(1)), 950, 1000).check_health().await;
        assert_eq!(snapshot.memory.percentage, 95);
        assert_eq!(snapshot.database.status, DatabaseStatus::Connected);
        assert_eq!(snapshot.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn exactly_at_threshold_is_still_healthy() {
        let snapshot = aggregator(Some(Duration::from_millis(1)), 900, 1000).check_health().await;
        assert_eq!(snapshot.memory.percentage, 90);
        assert!(snapshot.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn uptime_counts_from_construction() {
        let health = aggregator(Some(Duration::from_millis(1)), 1, 10);
        assert_eq!(health.check_health().await.uptime, 0);

        tokio::time::advance(Duration::from_secs(42)).await;
        let later = health.check_health().await;
        assert_eq!(later.uptime, 42);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(health.check_health().await.uptime >= later.uptime);
    }

    #[tokio::test]
    async fn serializes_with_the_endpoint_field_names() {
        let snapshot = aggregator(None, 50, 100).check_health().await;
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["database"]["status"], "disconnected");
        assert_eq!(json["database"]["latency"], 0);
        assert_eq!(json["memory"]["used"], 50);
        assert_eq!(json["memory"]["total"], 100);
        assert_eq!(json["memory"]["percentage"], 50);
        assert!(json["uptime"].is_u64());
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }
}
