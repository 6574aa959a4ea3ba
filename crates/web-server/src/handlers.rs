use crate::{error::AppError, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use core_types::{NewPlant, NewSoilReading, Page, Plant, PlantFilter, PlantHealthStatus, SoilData};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub health_status: PlantHealthStatus,
}

/// # GET /api/health
/// 200 with the snapshot when healthy, 503 with the same body otherwise.
pub async fn get_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.health.check_health().await;
    let status = if snapshot.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

/// # GET /api/plants?healthStatus=&skip=&take=
pub async fn list_plants(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<PlantFilter>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Plant>>, AppError> {
    let plants = state.plants.list(&filter, page).await?;
    Ok(Json(plants))
}

/// # POST /api/plants
pub async fn create_plant(
    State(state): State<Arc<AppState>>,
    Json(new_plant): Json<NewPlant>,
) -> Result<(StatusCode, Json<Plant>), AppError> {
    let plant = state.plants.create(&new_plant).await?;
    Ok((StatusCode::CREATED, Json(plant)))
}

/// # GET /api/plants/:id
pub async fn get_plant(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Plant>, AppError> {
    let plant = state.plants.get(id).await?;
    Ok(Json(plant))
}

/// # PATCH /api/plants/:id
pub async fn update_plant_status(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<Plant>, AppError> {
    let plant = state.plants.update_status(id, update.health_status).await?;
    Ok(Json(plant))
}

/// # DELETE /api/plants/:id
/// Returns the removed plant, soil data included.
pub async fn delete_plant(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Plant>, AppError> {
    let plant = state.plants.delete(id).await?;
    Ok(Json(plant))
}

/// # POST /api/plants/:id/soil-data
pub async fn add_soil_reading(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
    Json(reading): Json<NewSoilReading>,
) -> Result<(StatusCode, Json<SoilData>), AppError> {
    let soil = state.plants.add_soil_reading(id, &reading).await?;
    Ok((StatusCode::CREATED, Json(soil)))
}

/// Fallback for unknown routes.
pub async fn not_found() -> AppError {
    AppError::NotFound("No such route".to_string())
}
