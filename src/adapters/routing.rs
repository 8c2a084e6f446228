use async_trait::async_trait;

use crate::adapters::{AdapterError, MultiStopRoute, RouteEstimate, RoutingService};
use crate::geo::haversine_km;
use crate::models::driver::GeoPoint;

const ROAD_FACTOR: f64 = 1.3;

/// Routing estimate from great-circle distance stretched by a road factor and
/// driven at a constant average speed.
#[derive(Debug, Clone, Copy)]
pub struct StraightLineRouter {
    average_speed_kmh: f64,
}

impl StraightLineRouter {
    pub fn new(average_speed_kmh: f64) -> Self {
        Self { average_speed_kmh }
    }

    fn leg(&self, origin: &GeoPoint, destination: &GeoPoint) -> Result<RouteEstimate, AdapterError> {
        if !origin.is_valid() || !destination.is_valid() {
            return Err(AdapterError::InvalidCoordinate(
                "route endpoints must be valid coordinates".to_string(),
            ));
        }
        if self.average_speed_kmh <= 0.0 {
            return Err(AdapterError::Routing("average speed must be > 0".to_string()));
        }

        let distance_km = haversine_km(origin, destination) * ROAD_FACTOR;
        Ok(RouteEstimate {
            distance_km,
            duration_minutes: distance_km / self.average_speed_kmh * 60.0,
        })
    }
}

#[async_trait]
impl RoutingService for StraightLineRouter {
    async fn get_route(
        &self,
        origin: &GeoPoint,
        destination: &GeoPoint,
    ) -> Result<RouteEstimate, AdapterError> {
        self.leg(origin, destination)
    }

    async fn get_multi_stop_route(
        &self,
        points: &[GeoPoint],
    ) -> Result<MultiStopRoute, AdapterError> {
        let legs = points
            .windows(2)
            .map(|pair| self.leg(&pair[0], &pair[1]))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MultiStopRoute {
            total_distance_km: legs.iter().map(|leg| leg.distance_km).sum(),
            total_duration_minutes: legs.iter().map(|leg| leg.duration_minutes).sum(),
            legs,
        })
    }
}
