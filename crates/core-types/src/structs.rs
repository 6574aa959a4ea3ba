use crate::enums::PlantHealthStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A monitored plant together with its soil measurements.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plant {
    pub id: Uuid,
    pub health_status: PlantHealthStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Loaded by a second query; never a column of `plants`.
    #[sqlx(skip)]
    #[serde(default)]
    pub soil_data: Vec<SoilData>,
}

/// A single soil measurement taken for a plant.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoilData {
    pub id: Uuid,
    pub plant_id: Uuid,
    pub moisture_pct: Option<f64>,
    pub ph: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Input for creating a plant. The id is generated when omitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlant {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub health_status: PlantHealthStatus,
    #[serde(default)]
    pub soil_data: Vec<NewSoilReading>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSoilReading {
    pub moisture_pct: Option<f64>,
    pub ph: Option<f64>,
    pub temperature_celsius: Option<f64>,
}

/// Optional filters for listing plants.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantFilter {
    pub health_status: Option<PlantHealthStatus>,
}

/// Offset pagination in the `skip`/`take` form used by the REST API.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_take")]
    pub take: i64,
}

fn default_take() -> i64 {
    50
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            take: default_take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_plant_accepts_minimal_payload() {
        let plant: NewPlant = serde_json::from_str(r#"{"healthStatus":"warning"}"#).unwrap();
        assert_eq!(plant.health_status, PlantHealthStatus::Warning);
        assert!(plant.id.is_none());
        assert!(plant.soil_data.is_empty());
    }

    #[test]
    fn page_defaults_when_fields_missing() {
        let page: Page = serde_json::from_str("{}").unwrap();
        assert_eq!(page.skip, 0);
        assert_eq!(page.take, 50);
    }
}
