use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::{Driver, DriverStatus, GeoPoint};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/location", patch(update_driver_location))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub location: GeoPoint,
    #[serde(default)]
    pub status: Option<DriverStatus>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<Driver>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if !payload.location.is_valid() {
        return Err(AppError::BadRequest("location is invalid".to_string()));
    }

    let driver = Driver {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
        status: payload.status.unwrap_or(DriverStatus::Available),
        updated_at: Utc::now(),
    };

    state.fleet.upsert(driver.clone());
    info!(driver_id = %driver.id, "driver registered");
    Ok(Json(driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<Driver>> {
    Json(state.fleet.list())
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Driver>, AppError> {
    let driver = state
        .fleet
        .set_status(&id, payload.status)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(driver))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Driver>, AppError> {
    if !payload.location.is_valid() {
        return Err(AppError::BadRequest("location is invalid".to_string()));
    }

    let driver = state
        .fleet
        .set_location(&id, payload.location)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(driver))
}
