use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::queue::enqueue_event;
use crate::error::AppError;
use crate::models::driver::{DriverStatus, GeoPoint};
use crate::models::ride::{
    Ride, RideAccepted, RideCancelled, RideEvent, RideRequested, RideStatus,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(create_ride))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", post(accept_ride))
        .route("/rides/:id/cancel", post(cancel_ride))
}

#[derive(Deserialize)]
pub struct CreateRideRequest {
    pub rider_id: Uuid,
    pub rider_name: String,
    pub pickup: GeoPoint,
    pub dropoff: Option<GeoPoint>,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    #[serde(default)]
    pub estimated_fare: f64,
    #[serde(default)]
    pub estimated_distance_km: f64,
    #[serde(default)]
    pub estimated_duration_minutes: f64,
}

#[derive(Deserialize)]
pub struct AcceptRideRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct CancelRideRequest {
    pub rider_id: Uuid,
}

async fn create_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRideRequest>,
) -> Result<Json<Ride>, AppError> {
    if !payload.pickup.is_valid() {
        return Err(AppError::BadRequest("pickup location is invalid".to_string()));
    }
    if payload.dropoff.is_some_and(|dropoff| !dropoff.is_valid()) {
        return Err(AppError::BadRequest("dropoff location is invalid".to_string()));
    }

    let ride = Ride {
        id: Uuid::new_v4(),
        rider_id: payload.rider_id,
        rider_name: payload.rider_name,
        pickup: payload.pickup,
        dropoff: payload.dropoff,
        pickup_address: payload.pickup_address,
        dropoff_address: payload.dropoff_address,
        estimated_fare: payload.estimated_fare,
        estimated_distance_km: payload.estimated_distance_km,
        estimated_duration_minutes: payload.estimated_duration_minutes,
        status: RideStatus::Requested,
        driver_id: None,
        created_at: Utc::now(),
    };

    state.rides.insert(ride.clone());
    enqueue_event(&state, RideEvent::Requested(RideRequested::from(&ride))).await?;

    Ok(Json(ride))
}

async fn get_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Ride>, AppError> {
    let ride = state
        .rides
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))?;

    Ok(Json(ride))
}

async fn accept_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AcceptRideRequest>,
) -> Result<Json<Ride>, AppError> {
    let driver = state
        .fleet
        .get(&payload.driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {} not found", payload.driver_id)))?;
    if driver.status != DriverStatus::Available {
        return Err(AppError::Conflict(format!(
            "driver {} is not available",
            driver.id
        )));
    }

    let ride = state
        .rides
        .transition(&id, &[RideStatus::Requested, RideStatus::Pending], |ride| {
            ride.status = RideStatus::Accepted;
            ride.driver_id = Some(driver.id);
        })
        .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))?
        .map_err(|status| {
            AppError::Conflict(format!("ride {id} is already {}", status.as_str()))
        })?;

    state.fleet.set_status(&driver.id, DriverStatus::OnTrip);
    enqueue_event(
        &state,
        RideEvent::Accepted(RideAccepted {
            ride_id: ride.id,
            rider_id: ride.rider_id,
            driver_id: driver.id,
            pickup: ride.pickup,
            accepted_at: Utc::now(),
        }),
    )
    .await?;

    Ok(Json(ride))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRideRequest>,
) -> Result<Json<Ride>, AppError> {
    let existing = state
        .rides
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))?;
    if existing.rider_id != payload.rider_id {
        return Err(AppError::Forbidden("ride belongs to another rider".to_string()));
    }

    let ride = state
        .rides
        .transition(
            &id,
            &[RideStatus::Requested, RideStatus::Pending, RideStatus::Accepted],
            |ride| ride.status = RideStatus::Cancelled,
        )
        .ok_or_else(|| AppError::NotFound(format!("ride {id} not found")))?
        .map_err(|status| {
            AppError::Conflict(format!("ride {id} is already {}", status.as_str()))
        })?;

    if let Some(driver_id) = ride.driver_id {
        state.fleet.set_status(&driver_id, DriverStatus::Available);
    }
    enqueue_event(
        &state,
        RideEvent::Cancelled(RideCancelled {
            ride_id: ride.id,
            rider_id: ride.rider_id,
            driver_id: ride.driver_id,
            cancelled_at: Utc::now(),
        }),
    )
    .await?;

    Ok(Json(ride))
}
