use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryHealth {
    /// Megabytes.
    pub used: u64,
    /// Megabytes.
    pub total: u64,
    pub percentage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatabaseHealth {
    pub status: DatabaseStatus,
    /// Round-trip of the liveness probe in milliseconds; 0 when disconnected.
    pub latency: u64,
}

/// A point-in-time health report. Built fresh for every request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    /// Whole seconds since the aggregator was created.
    pub uptime: u64,
    pub memory: MemoryHealth,
    pub database: DatabaseHealth,
}

impl HealthSnapshot {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
