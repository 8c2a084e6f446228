use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::adapters::{AdapterError, CandidateLocator};
use crate::config::MatchingConfig;
use crate::geo::haversine_km;
use crate::models::driver::{Candidate, Driver, DriverStatus, GeoPoint};

/// Live driver positions. Searches grow the radius from the initial value to
/// the maximum until enough available drivers are found.
pub struct DriverFleet {
    drivers: DashMap<Uuid, Driver>,
    initial_radius_km: f64,
    max_radius_km: f64,
    radius_increment_km: f64,
}

impl DriverFleet {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            drivers: DashMap::new(),
            initial_radius_km: config.initial_search_radius_km,
            max_radius_km: config.max_search_radius_km,
            radius_increment_km: config.search_radius_increment_km,
        }
    }

    pub fn upsert(&self, driver: Driver) {
        self.drivers.insert(driver.id, driver);
    }

    pub fn get(&self, id: &Uuid) -> Option<Driver> {
        self.drivers.get(id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<Driver> {
        self.drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn set_status(&self, id: &Uuid, status: DriverStatus) -> Option<Driver> {
        let mut driver = self.drivers.get_mut(id)?;
        driver.status = status;
        driver.updated_at = Utc::now();
        Some(driver.clone())
    }

    pub fn set_location(&self, id: &Uuid, location: GeoPoint) -> Option<Driver> {
        let mut driver = self.drivers.get_mut(id)?;
        driver.location = location;
        driver.updated_at = Utc::now();
        Some(driver.clone())
    }

    fn available_within(&self, point: &GeoPoint, radius_km: f64) -> Vec<(f64, Candidate)> {
        self.drivers
            .iter()
            .filter_map(|entry| {
                let driver = entry.value();
                if driver.status != DriverStatus::Available {
                    return None;
                }

                let distance = haversine_km(&driver.location, point);
                (distance <= radius_km).then(|| (distance, Candidate::from(driver)))
            })
            .collect()
    }
}

#[async_trait]
impl CandidateLocator for DriverFleet {
    async fn find_available_drivers(
        &self,
        point: &GeoPoint,
        max_count: usize,
    ) -> Result<Vec<Candidate>, AdapterError> {
        if !point.is_valid() {
            return Err(AdapterError::InvalidCoordinate(format!(
                "({}, {})",
                point.lat, point.lng
            )));
        }

        let step = self.radius_increment_km.max(0.1);
        let mut radius = self.initial_radius_km.min(self.max_radius_km);
        let mut found = self.available_within(point, radius);

        while found.len() < max_count && radius < self.max_radius_km {
            radius = (radius + step).min(self.max_radius_km);
            found = self.available_within(point, radius);
        }

        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        found.truncate(max_count);

        Ok(found.into_iter().map(|(_, candidate)| candidate).collect())
    }

    fn calculate_distance(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        haversine_km(a, b)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::DriverFleet;
    use crate::adapters::CandidateLocator;
    use crate::config::MatchingConfig;
    use crate::models::driver::{Driver, DriverStatus, GeoPoint};

    fn driver(seed: u128, lat: f64, lng: f64, status: DriverStatus) -> Driver {
        Driver {
            id: Uuid::from_u128(seed),
            name: format!("driver-{seed}"),
            location: GeoPoint { lat, lng },
            status,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn returns_nearest_available_drivers_first() {
        let fleet = DriverFleet::new(&MatchingConfig::default());
        fleet.upsert(driver(1, 52.530, 13.405, DriverStatus::Available));
        fleet.upsert(driver(2, 52.521, 13.405, DriverStatus::Available));
        fleet.upsert(driver(3, 52.520, 13.405, DriverStatus::Offline));

        let found = fleet
            .find_available_drivers(&GeoPoint::new(52.52, 13.405), 10)
            .await
            .unwrap();

        let ids: Vec<Uuid> = found.iter().map(|c| c.driver_id).collect();
        assert_eq!(ids, vec![Uuid::from_u128(2), Uuid::from_u128(1)]);
    }

    #[tokio::test]
    async fn widens_radius_up_to_maximum_only() {
        let fleet = DriverFleet::new(&MatchingConfig::default());
        // ~7 km north: outside the initial radius, inside the maximum.
        fleet.upsert(driver(1, 52.583, 13.405, DriverStatus::Available));
        // ~55 km away: never returned.
        fleet.upsert(driver(2, 53.02, 13.405, DriverStatus::Available));

        let found = fleet
            .find_available_drivers(&GeoPoint::new(52.52, 13.405), 10)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_id, Uuid::from_u128(1));
    }

    #[tokio::test]
    async fn caps_results_at_max_count() {
        let fleet = DriverFleet::new(&MatchingConfig::default());
        for seed in 0..8 {
            fleet.upsert(driver(seed, 52.52 + seed as f64 * 0.001, 13.405, DriverStatus::Available));
        }

        let found = fleet
            .find_available_drivers(&GeoPoint::new(52.52, 13.405), 5)
            .await
            .unwrap();

        assert_eq!(found.len(), 5);
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_self() {
        let fleet = DriverFleet::new(&MatchingConfig::default());
        let a = GeoPoint::new(52.52, 13.405);
        let b = GeoPoint::new(48.85, 2.35);

        assert_eq!(fleet.calculate_distance(&a, &b), fleet.calculate_distance(&b, &a));
        assert_eq!(fleet.calculate_distance(&a, &a), 0.0);
    }
}
