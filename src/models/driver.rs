use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    OnTrip,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub status: DriverStatus,
    pub updated_at: DateTime<Utc>,
}

/// A driver considered for one dispatch cycle. Distance and ETA are filled
/// in when an offer is built for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub location: GeoPoint,
    pub status: DriverStatus,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<i64>,
}

impl From<&Driver> for Candidate {
    fn from(driver: &Driver) -> Self {
        Self {
            driver_id: driver.id,
            location: driver.location,
            status: driver.status,
            distance_km: None,
            eta_minutes: None,
        }
    }
}
