//! Contracts for the collaborators both engines consume, plus in-process
//! implementations used by the binary and the tests.

pub mod fleet;
pub mod notify;
pub mod repository;
pub mod routing;
pub mod store;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::driver::{Candidate, GeoPoint};
use crate::models::notification::Notification;
use crate::models::pool::{PassengerStatus, PoolPassenger, PoolRide, PoolStatus, RouteStop};
use crate::models::ride::RideStatus;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("candidate search failed: {0}")]
    Locator(String),

    #[error("routing failed: {0}")]
    Routing(String),

    #[error("ephemeral store failed: {0}")]
    Store(String),

    #[error("notification delivery failed: {0}")]
    Notify(String),

    #[error("repository failed: {0}")]
    Repository(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

#[async_trait]
pub trait CandidateLocator: Send + Sync {
    async fn find_available_drivers(
        &self,
        point: &GeoPoint,
        max_count: usize,
    ) -> Result<Vec<Candidate>, AdapterError>;

    fn calculate_distance(&self, a: &GeoPoint, b: &GeoPoint) -> f64;
}

pub trait SpatialCellIndex: Send + Sync {
    fn cell_for_point(&self, point: &GeoPoint, resolution: u8) -> Result<String, AdapterError>;

    fn k_ring_neighbors(
        &self,
        point: &GeoPoint,
        resolution: u8,
        ring_size: u32,
    ) -> Result<Vec<String>, AdapterError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub duration_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiStopRoute {
    pub total_distance_km: f64,
    pub total_duration_minutes: f64,
    pub legs: Vec<RouteEstimate>,
}

#[async_trait]
pub trait RoutingService: Send + Sync {
    async fn get_route(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
    ) -> Result<RouteEstimate, AdapterError>;

    async fn get_multi_stop_route(&self, points: &[GeoPoint])
    -> Result<MultiStopRoute, AdapterError>;
}

/// Key/value store with per-key expiry. An absent key means "never written
/// or already expired"; callers must not treat it as an error.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    async fn set_with_expiration(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), AdapterError>;

    async fn get(&self, key: &str) -> Result<Option<String>, AdapterError>;

    async fn delete(&self, key: &str) -> Result<(), AdapterError>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_to_user(
        &self,
        user_id: Uuid,
        notification: Notification,
    ) -> Result<(), AdapterError>;
}

/// Durable ride records, read by dispatch when the cached status hint is gone.
#[async_trait]
pub trait RideRepository: Send + Sync {
    async fn ride_status(&self, ride_id: Uuid) -> Result<Option<RideStatus>, AdapterError>;
}

#[async_trait]
pub trait PoolRepository: Send + Sync {
    async fn insert_pool(&self, pool: PoolRide) -> Result<(), AdapterError>;

    async fn get_pool(&self, id: Uuid) -> Result<Option<PoolRide>, AdapterError>;

    /// Moves a pool from `from` to `to`. Returns `None` when the pool is
    /// missing or no longer in `from`.
    async fn transition_pool(
        &self,
        pool_id: Uuid,
        from: PoolStatus,
        to: PoolStatus,
    ) -> Result<Option<PoolRide>, AdapterError>;

    /// Assigns a driver to a `matching` pool and confirms it.
    async fn assign_driver(
        &self,
        pool_id: Uuid,
        driver_id: Uuid,
        vehicle_id: Option<Uuid>,
    ) -> Result<Option<PoolRide>, AdapterError>;

    /// Replaces the stop list and totals, leaving every other field alone.
    async fn update_route(
        &self,
        pool_id: Uuid,
        stops: Vec<RouteStop>,
        total_distance_km: f64,
        total_duration_minutes: f64,
    ) -> Result<(), AdapterError>;

    /// `matching` pools in any of `cell_ids` whose deadline is after `now`
    /// and that still have room for `seats`.
    async fn find_matching_pools(
        &self,
        cell_ids: &[String],
        now: DateTime<Utc>,
        seats: u32,
    ) -> Result<Vec<PoolRide>, AdapterError>;

    /// Atomically reserves `seats` on a pool. Returns `None` when the pool is
    /// missing, no longer matching, past its deadline or would exceed capacity.
    async fn try_add_passengers(
        &self,
        pool_id: Uuid,
        seats: u32,
    ) -> Result<Option<PoolRide>, AdapterError>;

    async fn release_passengers(&self, pool_id: Uuid, seats: u32) -> Result<(), AdapterError>;

    async fn expired_matching_pools(&self, now: DateTime<Utc>)
    -> Result<Vec<PoolRide>, AdapterError>;

    /// Stores a new passenger unless the same rider already holds a
    /// non-terminal one. Returns `false` when the rider is busy.
    async fn insert_passenger(&self, passenger: PoolPassenger) -> Result<bool, AdapterError>;

    async fn get_passenger(&self, id: Uuid) -> Result<Option<PoolPassenger>, AdapterError>;

    /// Stores `passenger` only if the stored record is still in `expected`.
    async fn update_passenger(
        &self,
        passenger: PoolPassenger,
        expected: PassengerStatus,
    ) -> Result<bool, AdapterError>;

    /// Passengers of a pool in the order they joined.
    async fn passengers_for_pool(&self, pool_id: Uuid)
    -> Result<Vec<PoolPassenger>, AdapterError>;

    async fn active_passenger_for_rider(
        &self,
        rider_id: Uuid,
    ) -> Result<Option<PoolPassenger>, AdapterError>;
}
