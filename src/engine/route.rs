use chrono::{Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::pool::PoolEngine;
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::pool::{RouteStop, StopType};

impl PoolEngine {
    /// Rebuilds the pool's route in the background. Callers never wait on it,
    /// so route and ETA data lag briefly behind joins, cancels and stops.
    pub fn spawn_reoptimize(&self, pool_id: Uuid) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(err) = engine.reoptimize_route(pool_id).await {
                warn!(pool_ride_id = %pool_id, error = %err, "route re-optimization failed");
            }
        })
    }

    /// Replaces the stop list with every active passenger's pickup and
    /// dropoff, in joining order, timed by the routing collaborator.
    pub async fn reoptimize_route(&self, pool_id: Uuid) -> Result<(), AppError> {
        let repository = &self.collaborators.repository;
        if repository.get_pool(pool_id).await?.is_none() {
            debug!(pool_ride_id = %pool_id, "pool ride gone; nothing to re-route");
            return Ok(());
        }

        let passengers = repository.passengers_for_pool(pool_id).await?;
        let mut waypoints = Vec::new();
        for passenger in passengers.iter().filter(|p| !p.status.is_terminal()) {
            waypoints.push((
                passenger.id,
                StopType::Pickup,
                passenger.pickup,
                passenger.actual_pickup_at,
            ));
            waypoints.push((passenger.id, StopType::Dropoff, passenger.dropoff, None));
        }

        if waypoints.len() < 2 {
            repository.update_route(pool_id, Vec::new(), 0.0, 0.0).await?;
            return Ok(());
        }

        let points: Vec<GeoPoint> = waypoints.iter().map(|(_, _, point, _)| *point).collect();
        let route = self
            .collaborators
            .routing
            .get_multi_stop_route(&points)
            .await?;

        let mut arrival = Utc::now();
        let mut stops = Vec::with_capacity(waypoints.len());
        for (sequence, (passenger_id, stop_type, location, actual_arrival)) in
            waypoints.into_iter().enumerate()
        {
            if sequence > 0 {
                let leg_minutes = route
                    .legs
                    .get(sequence - 1)
                    .map(|leg| leg.duration_minutes)
                    .unwrap_or(0.0);
                arrival += Duration::seconds((leg_minutes * 60.0).round() as i64);
            }
            stops.push(RouteStop {
                passenger_id,
                stop_type,
                location,
                sequence,
                estimated_arrival: Some(arrival),
                actual_arrival,
            });
        }

        debug!(
            pool_ride_id = %pool_id,
            stops = stops.len(),
            distance_km = route.total_distance_km,
            "pool route rebuilt"
        );
        repository
            .update_route(
                pool_id,
                stops,
                route.total_distance_km,
                route.total_duration_minutes,
            )
            .await?;
        Ok(())
    }
}
