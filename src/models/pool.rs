use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Matching,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl PoolStatus {
    /// Forward-only lifecycle; cancellation is only possible while matching.
    pub fn can_transition_to(self, next: PoolStatus) -> bool {
        matches!(
            (self, next),
            (PoolStatus::Matching, PoolStatus::Confirmed)
                | (PoolStatus::Matching, PoolStatus::Cancelled)
                | (PoolStatus::Confirmed, PoolStatus::InProgress)
                | (PoolStatus::InProgress, PoolStatus::Completed)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PassengerStatus {
    Pending,
    Confirmed,
    PickedUp,
    DroppedOff,
    Cancelled,
    NoShow,
}

impl PassengerStatus {
    pub fn can_transition_to(self, next: PassengerStatus) -> bool {
        use PassengerStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, PickedUp)
                | (PickedUp, DroppedOff)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Pending, NoShow)
                | (Confirmed, NoShow)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PassengerStatus::DroppedOff | PassengerStatus::Cancelled | PassengerStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopType {
    Pickup,
    Dropoff,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteStop {
    pub passenger_id: Uuid,
    pub stop_type: StopType,
    pub location: GeoPoint,
    pub sequence: usize,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FareSchedule {
    pub base_fare: f64,
    pub per_km: f64,
    pub per_minute: f64,
}

impl FareSchedule {
    /// Unpooled fare for a solo route, rounded to cents.
    pub fn solo_fare(&self, distance_km: f64, duration_minutes: f64) -> f64 {
        round_cents(self.base_fare + distance_km * self.per_km + duration_minutes * self.per_minute)
    }
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolRide {
    pub id: Uuid,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub status: PoolStatus,
    pub current_passengers: u32,
    pub max_passengers: u32,
    pub stops: Vec<RouteStop>,
    pub total_distance_km: f64,
    pub total_duration_minutes: f64,
    pub center: GeoPoint,
    pub radius_km: f64,
    pub cell_id: String,
    pub fares: FareSchedule,
    pub matching_deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PoolRide {
    pub fn has_room_for(&self, seats: u32) -> bool {
        self.current_passengers.saturating_add(seats) <= self.max_passengers
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolPassenger {
    pub id: Uuid,
    pub pool_ride_id: Uuid,
    pub rider_id: Uuid,
    pub seats: u32,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub direct_distance_km: f64,
    pub direct_duration_minutes: f64,
    pub original_fare: f64,
    pub pool_fare: f64,
    pub savings_percent: f64,
    pub status: PassengerStatus,
    pub estimated_pickup_at: DateTime<Utc>,
    pub estimated_dropoff_at: DateTime<Utc>,
    pub actual_pickup_at: Option<DateTime<Utc>>,
    pub actual_dropoff_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RouteMatchScore {
    pub score: f64,
    pub detour_minutes: f64,
    pub detour_km: f64,
    pub detour_percent: f64,
    pub cost_savings_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolRequest {
    pub rider_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    #[serde(default = "default_seats")]
    pub seats: u32,
    pub max_wait_minutes: Option<i64>,
    pub city: Option<String>,
}

fn default_seats() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolRequestResponse {
    pub passenger_id: Uuid,
    pub pool_ride_id: Option<Uuid>,
    pub match_found: bool,
    pub original_fare: f64,
    pub pool_fare: f64,
    pub savings_percent: f64,
    pub estimated_pickup_at: DateTime<Utc>,
    pub estimated_dropoff_at: DateTime<Utc>,
    pub matching_deadline: DateTime<Utc>,
    pub message: String,
}

/// A pool ride as shown to one of its riders: co-riders' stops keep their
/// position in the route but not their identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolRideSnapshot {
    pub id: Uuid,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub status: PoolStatus,
    pub current_passengers: u32,
    pub max_passengers: u32,
    pub total_distance_km: f64,
    pub total_duration_minutes: f64,
    pub matching_deadline: DateTime<Utc>,
}

impl From<&PoolRide> for PoolRideSnapshot {
    fn from(ride: &PoolRide) -> Self {
        Self {
            id: ride.id,
            driver_id: ride.driver_id,
            vehicle_id: ride.vehicle_id,
            status: ride.status,
            current_passengers: ride.current_passengers,
            max_passengers: ride.max_passengers,
            total_distance_km: ride.total_distance_km,
            total_duration_minutes: ride.total_duration_minutes,
            matching_deadline: ride.matching_deadline,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisibleStop {
    pub sequence: usize,
    pub stop_type: StopType,
    pub own: bool,
    pub location: Option<GeoPoint>,
    pub estimated_arrival: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatusResponse {
    pub pool_ride: PoolRideSnapshot,
    pub passenger_status: PassengerStatus,
    pub other_passenger_stops: Vec<usize>,
    pub route: Vec<VisibleStop>,
    pub estimated_arrival: Option<DateTime<Utc>>,
}
