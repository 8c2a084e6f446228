use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

/// Snapshot of a ride proposal pushed to a single driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub rider_id: Uuid,
    pub rider_name: String,
    pub pickup: GeoPoint,
    pub dropoff: Option<GeoPoint>,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub estimated_fare: f64,
    pub estimated_distance_km: f64,
    pub estimated_duration_minutes: f64,
    pub distance_to_pickup_km: f64,
    pub eta_minutes: i64,
    pub expires_at: DateTime<Utc>,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedOffer {
    pub driver_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Every driver currently holding an offer for one ride.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OfferSet {
    pub ride_id: Uuid,
    pub driver_ids: Vec<Uuid>,
}

impl OfferSet {
    pub fn new(ride_id: Uuid) -> Self {
        Self {
            ride_id,
            driver_ids: Vec::new(),
        }
    }

    pub fn insert(&mut self, driver_id: Uuid) {
        if !self.driver_ids.contains(&driver_id) {
            self.driver_ids.push(driver_id);
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfferCancelReason {
    RideTaken,
    RideCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EtaTracking {
    pub ride_id: Uuid,
    pub pickup: GeoPoint,
    pub registered_at: DateTime<Utc>,
}
