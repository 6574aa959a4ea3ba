//! Sample data for development databases.

use crate::error::DbError;
use crate::repository::PlantRepository;
use core_types::{NewPlant, NewSoilReading, PlantHealthStatus};

pub const READINGS_PER_PLANT: usize = 5;

const SAMPLE_STATUSES: [PlantHealthStatus; 5] = [
    PlantHealthStatus::Healthy,
    PlantHealthStatus::Warning,
    PlantHealthStatus::Critical,
    PlantHealthStatus::Healthy,
    PlantHealthStatus::Warning,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct SeedOptions {
    /// Delete all soil data and plants before seeding.
    pub clear_existing: bool,
    /// Must be set alongside `clear_existing`.
    pub confirm_clear: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub cleared_plants: u64,
    pub cleared_soil_readings: u64,
    pub plants: usize,
    pub soil_readings: usize,
}

/// The plants inserted by [`seed`], each with `READINGS_PER_PLANT` readings.
/// Drier, more acidic soil for plants in worse health.
pub fn sample_plants() -> Vec<NewPlant> {
    SAMPLE_STATUSES
        .iter()
        .map(|&health_status| {
            let base_moisture = match health_status {
                PlantHealthStatus::Healthy => 45.0,
                PlantHealthStatus::Warning => 28.0,
                PlantHealthStatus::Critical => 12.0,
            };
            let base_ph = match health_status {
                PlantHealthStatus::Healthy => 6.5,
                PlantHealthStatus::Warning => 5.8,
                PlantHealthStatus::Critical => 5.0,
            };
            let soil_data = (0..READINGS_PER_PLANT)
                .map(|i| NewSoilReading {
                    moisture_pct: Some(base_moisture + i as f64 * 2.5),
                    ph: Some(base_ph + i as f64 * 0.1),
                    temperature_celsius: Some(18.0 + i as f64),
                })
                .collect();
            NewPlant {
                id: None,
                health_status,
                soil_data,
            }
        })
        .collect()
}

/// Inserts the sample plants, optionally clearing existing rows first.
///
/// Clearing without `confirm_clear` fails before the store is touched.
pub async fn seed(repo: &PlantRepository, options: SeedOptions) -> Result<SeedSummary, DbError> {
    if options.clear_existing && !options.confirm_clear {
        return Err(DbError::ClearNotConfirmed);
    }

    tracing::info!("Starting database seed...");
    let mut summary = SeedSummary::default();

    if options.clear_existing {
        let (soil, plants) = repo.clear_all().await?;
        summary.cleared_soil_readings = soil;
        summary.cleared_plants = plants;
    }

    for new_plant in sample_plants() {
        let plant = repo.create(&new_plant).await?;
        summary.plants += 1;
        summary.soil_readings += plant.soil_data.len();
    }

    tracing::info!(
        plants = summary.plants,
        soil_readings = summary.soil_readings,
        "Database seed completed successfully"
    );
    Ok(summary)
}
