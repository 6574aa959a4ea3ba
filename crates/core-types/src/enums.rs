use serde::{Deserialize, Serialize};
use std::fmt;

/// The health classification stored on every plant record.
///
/// Maps onto the `plant_health_status` PostgreSQL enum created by the migrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "plant_health_status", rename_all = "lowercase")]
pub enum PlantHealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl PlantHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlantHealthStatus::Healthy => "healthy",
            PlantHealthStatus::Warning => "warning",
            PlantHealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for PlantHealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction isolation levels supported by PostgreSQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn to_sql(&self) -> &'static str {
        match self {
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}
