//! Pool matching: fit a new rider into a nearby trip that is still forming,
//! or open a new one.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{
    NotificationSink, PoolRepository, RouteEstimate, RoutingService, SpatialCellIndex,
};
use crate::config::{PoolConfig, PoolSettings};
use crate::engine::scoring::{
    calculate_match_score, joined_pool_fare, new_pool_fare, savings_percent,
};
use crate::error::AppError;
use crate::models::driver::GeoPoint;
use crate::models::pool::{
    PassengerStatus, PoolPassenger, PoolRequest, PoolRequestResponse, PoolRide, PoolStatus,
    RouteMatchScore, RouteStop, StopType,
};
use crate::observability::metrics::Metrics;

/// Neighbouring rings searched around the pickup cell.
const CANDIDATE_RING_SIZE: u32 = 2;
const PICKUP_ESTIMATE_MINUTES: i64 = 5;
/// Longest matching window a rider may ask for.
const MAX_WAIT_CEILING_MINUTES: i64 = 24 * 60;

#[derive(Clone)]
pub struct PoolCollaborators {
    pub repository: Arc<dyn PoolRepository>,
    pub routing: Arc<dyn RoutingService>,
    pub cells: Arc<dyn SpatialCellIndex>,
    pub notifier: Arc<dyn NotificationSink>,
}

#[derive(Clone)]
pub struct PoolEngine {
    pub(crate) collaborators: PoolCollaborators,
    settings: Arc<PoolSettings>,
    pub(crate) metrics: Metrics,
}

/// Placeholder estimate: pickups are always expected five minutes out.
pub fn estimate_pickup_time(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(PICKUP_ESTIMATE_MINUTES)
}

pub fn estimate_dropoff_time(pickup_at: DateTime<Utc>, solo_duration_minutes: f64) -> DateTime<Utc> {
    pickup_at + Duration::seconds((solo_duration_minutes * 60.0).round() as i64)
}

struct Placement {
    pool: PoolRide,
    joined: Option<RouteMatchScore>,
}

impl PoolEngine {
    pub fn new(settings: PoolSettings, collaborators: PoolCollaborators, metrics: Metrics) -> Self {
        Self {
            collaborators,
            settings: Arc::new(settings),
            metrics,
        }
    }

    pub async fn request_pool_ride(
        &self,
        request: PoolRequest,
    ) -> Result<PoolRequestResponse, AppError> {
        let result = self.place_rider(&request).await;
        let outcome = match &result {
            Ok(response) if response.match_found => "matched",
            Ok(_) => "new_pool",
            Err(_) => "rejected",
        };
        self.metrics
            .pool_requests_total
            .with_label_values(&[outcome])
            .inc();
        result
    }

    async fn place_rider(&self, request: &PoolRequest) -> Result<PoolRequestResponse, AppError> {
        let config = self.settings.resolve(request.city.as_deref()).clone();
        validate_request(request, &config)?;

        let repository = &self.collaborators.repository;
        if let Some(active) = repository.active_passenger_for_rider(request.rider_id).await? {
            return Err(AppError::Conflict(format!(
                "rider already has an active pool ride ({})",
                active.pool_ride_id
            )));
        }

        let solo = self
            .collaborators
            .routing
            .get_route(&request.pickup, &request.dropoff)
            .await?;
        let original_fare = config.fares().solo_fare(solo.distance_km, solo.duration_minutes);

        let now = Utc::now();
        let passenger_id = Uuid::new_v4();
        let placement = match self.join_best_candidate(request, &config, now).await? {
            Some(placement) => placement,
            None => {
                self.open_pool(passenger_id, request, &config, &solo, now)
                    .await?
            }
        };

        let pool_fare = match &placement.joined {
            Some(match_score) => joined_pool_fare(original_fare, match_score),
            None => new_pool_fare(original_fare, &config),
        };
        let estimated_pickup_at = estimate_pickup_time(now);
        let estimated_dropoff_at = estimate_dropoff_time(estimated_pickup_at, solo.duration_minutes);

        let passenger = PoolPassenger {
            id: passenger_id,
            pool_ride_id: placement.pool.id,
            rider_id: request.rider_id,
            seats: request.seats,
            pickup: request.pickup,
            dropoff: request.dropoff,
            pickup_address: request.pickup_address.clone(),
            dropoff_address: request.dropoff_address.clone(),
            direct_distance_km: solo.distance_km,
            direct_duration_minutes: solo.duration_minutes,
            original_fare,
            pool_fare,
            savings_percent: savings_percent(original_fare, pool_fare),
            status: PassengerStatus::Pending,
            estimated_pickup_at,
            estimated_dropoff_at,
            actual_pickup_at: None,
            actual_dropoff_at: None,
            created_at: now,
            updated_at: now,
        };
        if !repository.insert_passenger(passenger.clone()).await? {
            self.undo_placement(&placement, request.seats).await;
            return Err(AppError::Conflict(
                "rider already has an active pool ride".to_string(),
            ));
        }

        let match_found = placement.joined.is_some();
        if match_found {
            // The new rider's stops are folded into the route in the background.
            self.spawn_reoptimize(placement.pool.id);
        }

        info!(
            rider_id = %request.rider_id,
            pool_ride_id = %placement.pool.id,
            passenger_id = %passenger.id,
            match_found,
            pool_fare,
            "pool request placed"
        );

        Ok(PoolRequestResponse {
            passenger_id: passenger.id,
            pool_ride_id: Some(placement.pool.id),
            match_found,
            original_fare,
            pool_fare,
            savings_percent: passenger.savings_percent,
            estimated_pickup_at,
            estimated_dropoff_at,
            matching_deadline: placement.pool.matching_deadline,
            message: if match_found {
                "Matched with a shared ride heading your way".to_string()
            } else {
                "Looking for riders to share your trip".to_string()
            },
        })
    }

    /// Scores every nearby forming pool and reserves seats on the best one
    /// that qualifies. A pool that fills up between scoring and reservation is
    /// skipped in favour of the next best.
    async fn join_best_candidate(
        &self,
        request: &PoolRequest,
        config: &PoolConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<Placement>, AppError> {
        let cell_ids = self.collaborators.cells.k_ring_neighbors(
            &request.pickup,
            config.cell_resolution,
            CANDIDATE_RING_SIZE,
        )?;
        let candidates = self
            .collaborators
            .repository
            .find_matching_pools(&cell_ids, now, request.seats)
            .await?;

        let mut qualified = Vec::new();
        for pool in candidates {
            let Some(match_score) = self.score_candidate(&pool, request, config).await else {
                continue;
            };
            self.metrics.pool_match_score.observe(match_score.score);

            if match_score.score >= config.min_match_score
                && match_score.cost_savings_percent >= config.min_savings_percent
            {
                qualified.push((pool, match_score));
            }
        }
        qualified.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));

        for (pool, match_score) in qualified {
            if let Some(reserved) = self
                .collaborators
                .repository
                .try_add_passengers(pool.id, request.seats)
                .await?
            {
                return Ok(Some(Placement {
                    pool: reserved,
                    joined: Some(match_score),
                }));
            }
        }

        Ok(None)
    }

    async fn score_candidate(
        &self,
        pool: &PoolRide,
        request: &PoolRequest,
        config: &PoolConfig,
    ) -> Option<RouteMatchScore> {
        let mut points: Vec<GeoPoint> = pool.stops.iter().map(|stop| stop.location).collect();
        points.push(request.pickup);
        points.push(request.dropoff);

        match self.collaborators.routing.get_multi_stop_route(&points).await {
            Ok(route) => Some(calculate_match_score(
                pool,
                &request.pickup,
                &request.dropoff,
                &route,
                config,
            )),
            Err(err) => {
                warn!(pool_ride_id = %pool.id, error = %err, "could not score pool candidate");
                None
            }
        }
    }

    async fn open_pool(
        &self,
        passenger_id: Uuid,
        request: &PoolRequest,
        config: &PoolConfig,
        solo: &RouteEstimate,
        now: DateTime<Utc>,
    ) -> Result<Placement, AppError> {
        let max_wait = request
            .max_wait_minutes
            .filter(|minutes| *minutes > 0)
            .unwrap_or(config.max_wait_minutes);
        let matching_deadline = Duration::try_minutes(max_wait)
            .and_then(|wait| now.checked_add_signed(wait))
            .ok_or_else(|| {
                AppError::BadRequest(format!("max_wait_minutes {max_wait} is out of range"))
            })?;
        let pool = PoolRide {
            id: Uuid::new_v4(),
            driver_id: None,
            vehicle_id: None,
            status: PoolStatus::Matching,
            current_passengers: request.seats,
            max_passengers: config.max_passengers_per_ride,
            stops: vec![
                RouteStop {
                    passenger_id,
                    stop_type: StopType::Pickup,
                    location: request.pickup,
                    sequence: 0,
                    estimated_arrival: Some(estimate_pickup_time(now)),
                    actual_arrival: None,
                },
                RouteStop {
                    passenger_id,
                    stop_type: StopType::Dropoff,
                    location: request.dropoff,
                    sequence: 1,
                    estimated_arrival: Some(estimate_dropoff_time(
                        estimate_pickup_time(now),
                        solo.duration_minutes,
                    )),
                    actual_arrival: None,
                },
            ],
            total_distance_km: solo.distance_km,
            total_duration_minutes: solo.duration_minutes,
            center: request.pickup,
            radius_km: config.match_radius_km,
            cell_id: self
                .collaborators
                .cells
                .cell_for_point(&request.pickup, config.cell_resolution)?,
            fares: config.fares(),
            matching_deadline,
            created_at: now,
            updated_at: now,
        };

        self.collaborators.repository.insert_pool(pool.clone()).await?;
        Ok(Placement { pool, joined: None })
    }

    /// Gives back the seats or the freshly opened pool when the rider lost a
    /// race with their own concurrent request.
    async fn undo_placement(&self, placement: &Placement, seats: u32) {
        let repository = &self.collaborators.repository;
        let result = match placement.joined {
            Some(_) => repository.release_passengers(placement.pool.id, seats).await,
            None => repository
                .transition_pool(placement.pool.id, PoolStatus::Matching, PoolStatus::Cancelled)
                .await
                .map(|_| ()),
        };
        if let Err(err) = result {
            warn!(pool_ride_id = %placement.pool.id, error = %err, "failed to undo pool placement");
        }
    }
}

fn validate_request(request: &PoolRequest, config: &PoolConfig) -> Result<(), AppError> {
    if !request.pickup.is_valid() {
        return Err(AppError::BadRequest("pickup location is invalid".to_string()));
    }
    if !request.dropoff.is_valid() {
        return Err(AppError::BadRequest("dropoff location is invalid".to_string()));
    }
    if request.pickup == request.dropoff {
        return Err(AppError::BadRequest(
            "pickup and dropoff must be different".to_string(),
        ));
    }
    if request.seats == 0 || request.seats > config.max_passengers_per_ride {
        return Err(AppError::BadRequest(format!(
            "seats must be between 1 and {}",
            config.max_passengers_per_ride
        )));
    }
    if request
        .max_wait_minutes
        .is_some_and(|minutes| minutes > MAX_WAIT_CEILING_MINUTES)
    {
        return Err(AppError::BadRequest(format!(
            "max_wait_minutes must be at most {MAX_WAIT_CEILING_MINUTES}"
        )));
    }
    Ok(())
}
