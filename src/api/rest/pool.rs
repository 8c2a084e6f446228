use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::pool::{
    PoolPassenger, PoolRequest, PoolRequestResponse, PoolRide, PoolStatusResponse,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pool/requests", post(request_pool_ride))
        .route("/pool/passengers/:id", get(get_pool_status))
        .route("/pool/passengers/:id/confirm", post(confirm_passenger))
        .route("/pool/passengers/:id/cancel", post(cancel_passenger))
        .route("/pool/passengers/:id/pickup", post(pickup_passenger))
        .route("/pool/passengers/:id/dropoff", post(dropoff_passenger))
        .route("/pool/passengers/:id/no-show", post(mark_no_show))
        .route("/pool/rides/:id/assign", post(assign_driver))
}

#[derive(Deserialize)]
pub struct RiderQuery {
    pub rider_id: Uuid,
}

#[derive(Deserialize)]
pub struct RiderAction {
    pub rider_id: Uuid,
}

#[derive(Deserialize)]
pub struct DriverAction {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct AssignDriverRequest {
    pub driver_id: Uuid,
    pub vehicle_id: Option<Uuid>,
}

async fn request_pool_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PoolRequest>,
) -> Result<Json<PoolRequestResponse>, AppError> {
    Ok(Json(state.pool.request_pool_ride(payload).await?))
}

async fn get_pool_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<RiderQuery>,
) -> Result<Json<PoolStatusResponse>, AppError> {
    Ok(Json(state.pool.get_pool_status(id, query.rider_id).await?))
}

async fn confirm_passenger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RiderAction>,
) -> Result<Json<PoolPassenger>, AppError> {
    Ok(Json(state.pool.confirm_passenger(id, payload.rider_id).await?))
}

async fn cancel_passenger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RiderAction>,
) -> Result<Json<PoolPassenger>, AppError> {
    Ok(Json(state.pool.cancel_passenger(id, payload.rider_id).await?))
}

async fn pickup_passenger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverAction>,
) -> Result<Json<PoolPassenger>, AppError> {
    Ok(Json(state.pool.pickup_passenger(id, payload.driver_id).await?))
}

async fn dropoff_passenger(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverAction>,
) -> Result<Json<PoolPassenger>, AppError> {
    Ok(Json(state.pool.dropoff_passenger(id, payload.driver_id).await?))
}

async fn mark_no_show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverAction>,
) -> Result<Json<PoolPassenger>, AppError> {
    Ok(Json(state.pool.mark_no_show(id, payload.driver_id).await?))
}

async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignDriverRequest>,
) -> Result<Json<PoolRide>, AppError> {
    Ok(Json(
        state
            .pool
            .assign_driver(id, payload.driver_id, payload.vehicle_id)
            .await?,
    ))
}
