use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Requested,
    Pending,
    Accepted,
    Cancelled,
    Completed,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::Pending => "pending",
            RideStatus::Accepted => "accepted",
            RideStatus::Cancelled => "cancelled",
            RideStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "requested" => Some(RideStatus::Requested),
            "pending" => Some(RideStatus::Pending),
            "accepted" => Some(RideStatus::Accepted),
            "cancelled" => Some(RideStatus::Cancelled),
            "completed" => Some(RideStatus::Completed),
            _ => None,
        }
    }
}

/// The ride record owned by the ride service. The dispatch engine only reads
/// its status, as the fallback when the cached status hint is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub rider_name: String,
    pub pickup: GeoPoint,
    pub dropoff: Option<GeoPoint>,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub estimated_fare: f64,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: f64,
    pub status: RideStatus,
    pub driver_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequested {
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub rider_name: String,
    pub pickup: GeoPoint,
    pub dropoff: Option<GeoPoint>,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub estimated_fare: f64,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: f64,
    pub requested_at: DateTime<Utc>,
}

impl From<&Ride> for RideRequested {
    fn from(ride: &Ride) -> Self {
        Self {
            ride_id: ride.id,
            rider_id: ride.rider_id,
            rider_name: ride.rider_name.clone(),
            pickup: ride.pickup,
            dropoff: ride.dropoff,
            pickup_address: ride.pickup_address.clone(),
            dropoff_address: ride.dropoff_address.clone(),
            estimated_fare: ride.estimated_fare,
            estimated_distance_km: ride.estimated_distance_km,
            estimated_duration_minutes: ride.estimated_duration_minutes,
            requested_at: ride.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideAccepted {
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    pub driver_id: Uuid,
    pub pickup: GeoPoint,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideCancelled {
    pub ride_id: Uuid,
    pub rider_id: Uuid,
    /// Set when a driver had already been assigned before the cancellation.
    pub driver_id: Option<Uuid>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RideEvent {
    Requested(RideRequested),
    Accepted(RideAccepted),
    Cancelled(RideCancelled),
}

impl RideEvent {
    pub fn ride_id(&self) -> Uuid {
        match self {
            RideEvent::Requested(event) => event.ride_id,
            RideEvent::Accepted(event) => event.ride_id,
            RideEvent::Cancelled(event) => event.ride_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RideEvent::Requested(_) => "requested",
            RideEvent::Accepted(_) => "accepted",
            RideEvent::Cancelled(_) => "cancelled",
        }
    }
}
