use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::pool::PoolEngine;
use crate::error::AppError;
use crate::models::notification::Notification;
use crate::models::pool::{
    PassengerStatus, PoolPassenger, PoolRide, PoolRideSnapshot, PoolStatus, PoolStatusResponse,
    StopType, VisibleStop,
};

impl PoolEngine {
    pub async fn confirm_passenger(
        &self,
        passenger_id: Uuid,
        rider_id: Uuid,
    ) -> Result<PoolPassenger, AppError> {
        let passenger = self.rider_owned_passenger(passenger_id, rider_id).await?;
        self.advance_passenger(passenger, PassengerStatus::Confirmed).await
    }

    /// Riders may back out until they are picked up. Their seats are released
    /// and a forming pool left without riders is cancelled.
    pub async fn cancel_passenger(
        &self,
        passenger_id: Uuid,
        rider_id: Uuid,
    ) -> Result<PoolPassenger, AppError> {
        let passenger = self.rider_owned_passenger(passenger_id, rider_id).await?;
        let cancelled = self
            .advance_passenger(passenger, PassengerStatus::Cancelled)
            .await?;

        self.release_seats(&cancelled).await?;
        Ok(cancelled)
    }

    pub async fn mark_no_show(
        &self,
        passenger_id: Uuid,
        driver_id: Uuid,
    ) -> Result<PoolPassenger, AppError> {
        let (passenger, _) = self.driver_owned_passenger(passenger_id, driver_id).await?;
        let no_show = self
            .advance_passenger(passenger, PassengerStatus::NoShow)
            .await?;

        self.release_seats(&no_show).await?;
        Ok(no_show)
    }

    pub async fn assign_driver(
        &self,
        pool_id: Uuid,
        driver_id: Uuid,
        vehicle_id: Option<Uuid>,
    ) -> Result<PoolRide, AppError> {
        let repository = &self.collaborators.repository;
        let pool = repository
            .get_pool(pool_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("pool ride {pool_id} not found")))?;

        let Some(assigned) = repository
            .assign_driver(pool_id, driver_id, vehicle_id)
            .await?
        else {
            return Err(AppError::Conflict(format!(
                "pool ride {pool_id} is {:?}, driver can only be assigned while matching",
                pool.status
            )));
        };

        for passenger in repository.passengers_for_pool(pool_id).await? {
            if passenger.status.is_terminal() {
                continue;
            }
            if let Err(err) = self
                .collaborators
                .notifier
                .send_to_user(
                    passenger.rider_id,
                    Notification::PoolDriverAssigned {
                        pool_ride_id: pool_id,
                        driver_id,
                        vehicle_id,
                    },
                )
                .await
            {
                warn!(pool_ride_id = %pool_id, rider_id = %passenger.rider_id, error = %err, "failed to notify rider of driver");
            }
        }

        info!(pool_ride_id = %pool_id, driver_id = %driver_id, "driver assigned to pool ride");
        Ok(assigned)
    }

    pub async fn pickup_passenger(
        &self,
        passenger_id: Uuid,
        driver_id: Uuid,
    ) -> Result<PoolPassenger, AppError> {
        let (mut passenger, pool) = self.driver_owned_passenger(passenger_id, driver_id).await?;
        passenger.actual_pickup_at = Some(Utc::now());
        let picked_up = self
            .advance_passenger(passenger, PassengerStatus::PickedUp)
            .await?;

        if pool.status == PoolStatus::Confirmed {
            self.collaborators
                .repository
                .transition_pool(pool.id, PoolStatus::Confirmed, PoolStatus::InProgress)
                .await?;
        }

        self.spawn_reoptimize(pool.id);
        Ok(picked_up)
    }

    pub async fn dropoff_passenger(
        &self,
        passenger_id: Uuid,
        driver_id: Uuid,
    ) -> Result<PoolPassenger, AppError> {
        let (mut passenger, pool) = self.driver_owned_passenger(passenger_id, driver_id).await?;
        passenger.actual_dropoff_at = Some(Utc::now());
        let dropped_off = self
            .advance_passenger(passenger, PassengerStatus::DroppedOff)
            .await?;

        if !self.complete_if_finished(pool.id).await? {
            self.spawn_reoptimize(pool.id);
        }
        Ok(dropped_off)
    }

    pub async fn get_pool_status(
        &self,
        passenger_id: Uuid,
        rider_id: Uuid,
    ) -> Result<PoolStatusResponse, AppError> {
        let passenger = self.rider_owned_passenger(passenger_id, rider_id).await?;
        let pool = self.load_pool(passenger.pool_ride_id).await?;

        let route: Vec<VisibleStop> = pool
            .stops
            .iter()
            .map(|stop| {
                let own = stop.passenger_id == passenger.id;
                VisibleStop {
                    sequence: stop.sequence,
                    stop_type: stop.stop_type,
                    own,
                    location: own.then_some(stop.location),
                    estimated_arrival: stop.estimated_arrival,
                }
            })
            .collect();
        let other_passenger_stops = route
            .iter()
            .filter(|stop| !stop.own)
            .map(|stop| stop.sequence)
            .collect();

        let next_stop = match passenger.status {
            PassengerStatus::Pending | PassengerStatus::Confirmed => Some(StopType::Pickup),
            PassengerStatus::PickedUp => Some(StopType::Dropoff),
            _ => None,
        };
        let estimated_arrival = next_stop.and_then(|stop_type| {
            route
                .iter()
                .find(|stop| stop.own && stop.stop_type == stop_type)
                .and_then(|stop| stop.estimated_arrival)
                .or(Some(match stop_type {
                    StopType::Pickup => passenger.estimated_pickup_at,
                    StopType::Dropoff => passenger.estimated_dropoff_at,
                }))
        });

        Ok(PoolStatusResponse {
            pool_ride: PoolRideSnapshot::from(&pool),
            passenger_status: passenger.status,
            other_passenger_stops,
            route,
            estimated_arrival,
        })
    }

    /// Cancels every pool still matching past its deadline, along with its
    /// waiting riders. Returns how many pools were cancelled.
    pub async fn expire_stale_pools(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let repository = &self.collaborators.repository;
        let mut expired = 0;

        for pool in repository.expired_matching_pools(now).await? {
            if repository
                .transition_pool(pool.id, PoolStatus::Matching, PoolStatus::Cancelled)
                .await?
                .is_none()
            {
                // A driver was assigned in the meantime.
                continue;
            }
            expired += 1;
            self.cancel_riders_of(pool.id).await?;
            info!(pool_ride_id = %pool.id, "pool ride expired without a driver");
        }

        Ok(expired)
    }

    async fn cancel_riders_of(&self, pool_id: Uuid) -> Result<(), AppError> {
        let repository = &self.collaborators.repository;
        for passenger in repository.passengers_for_pool(pool_id).await? {
            if !passenger.status.can_transition_to(PassengerStatus::Cancelled) {
                continue;
            }

            let rider_id = passenger.rider_id;
            let expected = passenger.status;
            let cancelled = PoolPassenger {
                status: PassengerStatus::Cancelled,
                updated_at: Utc::now(),
                ..passenger
            };
            if !repository.update_passenger(cancelled, expected).await? {
                continue;
            }

            if let Err(err) = self
                .collaborators
                .notifier
                .send_to_user(rider_id, Notification::PoolRideCancelled { pool_ride_id: pool_id })
                .await
            {
                warn!(pool_ride_id = %pool_id, rider_id = %rider_id, error = %err, "failed to notify rider of cancellation");
            }
        }
        Ok(())
    }

    async fn release_seats(&self, passenger: &PoolPassenger) -> Result<(), AppError> {
        let repository = &self.collaborators.repository;
        repository
            .release_passengers(passenger.pool_ride_id, passenger.seats)
            .await?;

        let pool = self.load_pool(passenger.pool_ride_id).await?;
        let anyone_left = repository
            .passengers_for_pool(pool.id)
            .await?
            .iter()
            .any(|p| !p.status.is_terminal());

        if !anyone_left && pool.status == PoolStatus::Matching {
            repository
                .transition_pool(pool.id, PoolStatus::Matching, PoolStatus::Cancelled)
                .await?;
            info!(pool_ride_id = %pool.id, "pool ride cancelled: no riders left");
            return Ok(());
        }

        if !self.complete_if_finished(pool.id).await? {
            self.spawn_reoptimize(pool.id);
        }
        Ok(())
    }

    /// Completes an in-progress pool once nobody is left on board or waiting.
    async fn complete_if_finished(&self, pool_id: Uuid) -> Result<bool, AppError> {
        let repository = &self.collaborators.repository;
        let passengers = repository.passengers_for_pool(pool_id).await?;
        let finished = passengers.iter().all(|p| p.status.is_terminal())
            && passengers
                .iter()
                .any(|p| p.status == PassengerStatus::DroppedOff);
        if !finished {
            return Ok(false);
        }

        let completed = repository
            .transition_pool(pool_id, PoolStatus::InProgress, PoolStatus::Completed)
            .await?
            .is_some();
        if completed {
            info!(pool_ride_id = %pool_id, "pool ride completed");
        }
        Ok(completed)
    }

    async fn advance_passenger(
        &self,
        passenger: PoolPassenger,
        next: PassengerStatus,
    ) -> Result<PoolPassenger, AppError> {
        let current = passenger.status;
        if !current.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "passenger {} cannot move from {current:?} to {next:?}",
                passenger.id
            )));
        }

        let updated = PoolPassenger {
            status: next,
            updated_at: Utc::now(),
            ..passenger
        };
        if !self
            .collaborators
            .repository
            .update_passenger(updated.clone(), current)
            .await?
        {
            return Err(AppError::Conflict(format!(
                "passenger {} changed concurrently",
                updated.id
            )));
        }
        Ok(updated)
    }

    async fn load_passenger(&self, passenger_id: Uuid) -> Result<PoolPassenger, AppError> {
        self.collaborators
            .repository
            .get_passenger(passenger_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("pool passenger {passenger_id} not found")))
    }

    async fn load_pool(&self, pool_id: Uuid) -> Result<PoolRide, AppError> {
        self.collaborators
            .repository
            .get_pool(pool_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("pool ride {pool_id} not found")))
    }

    async fn rider_owned_passenger(
        &self,
        passenger_id: Uuid,
        rider_id: Uuid,
    ) -> Result<PoolPassenger, AppError> {
        let passenger = self.load_passenger(passenger_id).await?;
        if passenger.rider_id != rider_id {
            return Err(AppError::Forbidden(
                "pool passenger belongs to another rider".to_string(),
            ));
        }
        Ok(passenger)
    }

    async fn driver_owned_passenger(
        &self,
        passenger_id: Uuid,
        driver_id: Uuid,
    ) -> Result<(PoolPassenger, PoolRide), AppError> {
        let passenger = self.load_passenger(passenger_id).await?;
        let pool = self.load_pool(passenger.pool_ride_id).await?;
        if pool.driver_id != Some(driver_id) {
            return Err(AppError::Forbidden(
                "pool ride is assigned to another driver".to_string(),
            ));
        }
        Ok((passenger, pool))
    }
}

/// Periodically cancels pools whose matching window closed without a driver.
pub async fn run_pool_sweeper(engine: PoolEngine, every: Duration) {
    info!(interval_seconds = every.as_secs(), "pool expiry sweeper started");
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        match engine.expire_stale_pools(Utc::now()).await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "expired stale pool rides"),
            Err(err) => warn!(error = %err, "pool expiry sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use crate::adapters::notify::BroadcastNotifier;
    use crate::adapters::repository::MemoryPoolRepository;
    use crate::adapters::routing::StraightLineRouter;
    use crate::adapters::PoolRepository;
    use crate::config::{PoolConfig, PoolSettings};
    use crate::engine::pool::{PoolCollaborators, PoolEngine};
    use crate::error::AppError;
    use crate::geo::cells::H3CellIndex;
    use crate::models::driver::GeoPoint;
    use crate::models::notification::Notification;
    use crate::models::pool::{PassengerStatus, PoolRequest, PoolStatus};
    use crate::observability::metrics::Metrics;

    struct Harness {
        engine: PoolEngine,
        repository: Arc<MemoryPoolRepository>,
        notifier: Arc<BroadcastNotifier>,
    }

    fn harness(global: PoolConfig) -> Harness {
        let repository = Arc::new(MemoryPoolRepository::new());
        let notifier = Arc::new(BroadcastNotifier::new(64));
        let engine = PoolEngine::new(
            PoolSettings {
                global,
                ..PoolSettings::default()
            },
            PoolCollaborators {
                repository: repository.clone(),
                routing: Arc::new(StraightLineRouter::new(30.0)),
                cells: Arc::new(H3CellIndex::new()),
                notifier: notifier.clone(),
            },
            Metrics::new(),
        );
        Harness {
            engine,
            repository,
            notifier,
        }
    }

    /// Loose detour limits so two riders heading north from the same corner
    /// end up sharing.
    fn sharing_config() -> PoolConfig {
        PoolConfig {
            max_detour_percent: 400.0,
            max_detour_minutes: 60.0,
            ..PoolConfig::default()
        }
    }

    fn request(rider_id: Uuid, pickup: GeoPoint, dropoff: GeoPoint) -> PoolRequest {
        PoolRequest {
            rider_id,
            pickup,
            dropoff,
            pickup_address: None,
            dropoff_address: None,
            seats: 1,
            max_wait_minutes: None,
            city: None,
        }
    }

    fn first_rider() -> PoolRequest {
        request(
            Uuid::from_u128(1),
            GeoPoint::new(52.5200, 13.4050),
            GeoPoint::new(52.5400, 13.4050),
        )
    }

    fn second_rider() -> PoolRequest {
        request(
            Uuid::from_u128(2),
            GeoPoint::new(52.5205, 13.4052),
            GeoPoint::new(52.5390, 13.4052),
        )
    }

    #[tokio::test]
    async fn first_rider_opens_new_pool() {
        let h = harness(PoolConfig::default());
        let rider = first_rider();

        let response = h.engine.request_pool_ride(rider.clone()).await.unwrap();

        assert!(!response.match_found);
        assert!(response.pool_fare < response.original_fare);
        assert!((response.savings_percent - 25.0).abs() < 0.5);

        let pool_id = response.pool_ride_id.unwrap();
        let pool = h.repository.get_pool(pool_id).await.unwrap().unwrap();
        assert_eq!(pool.status, PoolStatus::Matching);
        assert_eq!(pool.current_passengers, rider.seats);
        assert_eq!(pool.stops.len(), 2);
        assert!(pool.stops.iter().all(|stop| stop.passenger_id == response.passenger_id));
        assert!(pool.matching_deadline > Utc::now() + Duration::minutes(9));
    }

    #[tokio::test]
    async fn nearby_rider_joins_forming_pool() {
        let h = harness(sharing_config());
        let first = h.engine.request_pool_ride(first_rider()).await.unwrap();

        let second = h.engine.request_pool_ride(second_rider()).await.unwrap();

        assert!(second.match_found);
        assert_eq!(second.pool_ride_id, first.pool_ride_id);
        assert!(second.savings_percent >= 10.0);
        assert_eq!(h.repository.pool_count(), 1);

        let pool_id = second.pool_ride_id.unwrap();
        h.engine.reoptimize_route(pool_id).await.unwrap();
        let pool = h.repository.get_pool(pool_id).await.unwrap().unwrap();
        assert_eq!(pool.current_passengers, 2);
        assert_eq!(pool.stops.len(), 4);
        assert!(pool.stops.iter().all(|stop| stop.estimated_arrival.is_some()));
    }

    #[tokio::test]
    async fn strict_detour_limits_open_second_pool() {
        let h = harness(PoolConfig::default());
        h.engine.request_pool_ride(first_rider()).await.unwrap();

        let second = h.engine.request_pool_ride(second_rider()).await.unwrap();

        assert!(!second.match_found);
        assert_eq!(h.repository.pool_count(), 2);
    }

    #[tokio::test]
    async fn savings_floor_above_the_offer_opens_second_pool() {
        // A joined rider saves less than the flat discount once there is any detour.
        let h = harness(PoolConfig {
            min_savings_percent: 25.0,
            ..sharing_config()
        });
        let first = h.engine.request_pool_ride(first_rider()).await.unwrap();

        let second = h.engine.request_pool_ride(second_rider()).await.unwrap();

        assert!(!second.match_found);
        assert_ne!(second.pool_ride_id, first.pool_ride_id);
        assert_eq!(h.repository.pool_count(), 2);
    }

    #[tokio::test]
    async fn full_pool_is_not_joined() {
        let h = harness(sharing_config());
        let mut family = first_rider();
        family.seats = 4;
        let first = h.engine.request_pool_ride(family).await.unwrap();

        let second = h.engine.request_pool_ride(second_rider()).await.unwrap();

        assert!(!second.match_found);
        assert_ne!(second.pool_ride_id, first.pool_ride_id);
        assert_eq!(h.repository.pool_count(), 2);
        let full = h
            .repository
            .get_pool(first.pool_ride_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(full.current_passengers, 4);
    }

    #[tokio::test]
    async fn requested_wait_sets_matching_deadline() {
        let h = harness(PoolConfig::default());
        let mut rider = first_rider();
        rider.max_wait_minutes = Some(3);
        let before = Utc::now();

        let response = h.engine.request_pool_ride(rider).await.unwrap();

        assert!(response.matching_deadline >= before + Duration::minutes(3));
        assert!(response.matching_deadline <= Utc::now() + Duration::minutes(3));
        let pool = h
            .repository
            .get_pool(response.pool_ride_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.matching_deadline, response.matching_deadline);
    }

    #[tokio::test]
    async fn oversized_wait_is_rejected() {
        let h = harness(PoolConfig::default());
        let mut rider = first_rider();
        rider.max_wait_minutes = Some(i64::MAX / 2);

        assert!(matches!(
            h.engine.request_pool_ride(rider).await,
            Err(AppError::BadRequest(_))
        ));

        let mut just_over = first_rider();
        just_over.max_wait_minutes = Some(24 * 60 + 1);
        assert!(matches!(
            h.engine.request_pool_ride(just_over).await,
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(h.repository.pool_count(), 0);
    }

    #[tokio::test]
    async fn oversized_default_wait_fails_without_panicking() {
        let h = harness(PoolConfig {
            max_wait_minutes: i64::MAX / 2,
            ..PoolConfig::default()
        });

        assert!(matches!(
            h.engine.request_pool_ride(first_rider()).await,
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(h.repository.pool_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_from_one_rider_place_once() {
        let h = harness(PoolConfig::default());

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let engine = h.engine.clone();
                tokio::spawn(async move { engine.request_pool_ride(first_rider()).await })
            })
            .collect();

        let mut placed = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => placed += 1,
                Err(err) => assert!(matches!(err, AppError::Conflict(_))),
            }
        }

        assert_eq!(placed, 1);
        assert_eq!(h.repository.passenger_count(), 1);
        let forming = h
            .repository
            .expired_matching_pools(Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(forming.len(), 1);
    }

    #[tokio::test]
    async fn rider_with_active_pool_is_rejected() {
        let h = harness(PoolConfig::default());
        h.engine.request_pool_ride(first_rider()).await.unwrap();

        let err = h.engine.request_pool_ride(first_rider()).await.unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(h.repository.passenger_count(), 1);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let h = harness(PoolConfig::default());

        let mut too_many = first_rider();
        too_many.seats = 5;
        assert!(matches!(
            h.engine.request_pool_ride(too_many).await,
            Err(AppError::BadRequest(_))
        ));

        let mut no_seats = first_rider();
        no_seats.seats = 0;
        assert!(matches!(
            h.engine.request_pool_ride(no_seats).await,
            Err(AppError::BadRequest(_))
        ));

        let mut same_spot = first_rider();
        same_spot.dropoff = same_spot.pickup;
        assert!(matches!(
            h.engine.request_pool_ride(same_spot).await,
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(h.repository.pool_count(), 0);
    }

    #[tokio::test]
    async fn confirm_requires_owning_rider() {
        let h = harness(PoolConfig::default());
        let response = h.engine.request_pool_ride(first_rider()).await.unwrap();

        let err = h
            .engine
            .confirm_passenger(response.passenger_id, Uuid::from_u128(42))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let confirmed = h
            .engine
            .confirm_passenger(response.passenger_id, Uuid::from_u128(1))
            .await
            .unwrap();
        assert_eq!(confirmed.status, PassengerStatus::Confirmed);

        let again = h
            .engine
            .confirm_passenger(response.passenger_id, Uuid::from_u128(1))
            .await
            .unwrap_err();
        assert!(matches!(again, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_passenger_is_not_found() {
        let h = harness(PoolConfig::default());

        let err = h
            .engine
            .get_pool_status(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn last_rider_cancelling_cancels_forming_pool() {
        let h = harness(PoolConfig::default());
        let response = h.engine.request_pool_ride(first_rider()).await.unwrap();

        let cancelled = h
            .engine
            .cancel_passenger(response.passenger_id, Uuid::from_u128(1))
            .await
            .unwrap();

        assert_eq!(cancelled.status, PassengerStatus::Cancelled);
        let pool = h
            .repository
            .get_pool(response.pool_ride_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pool.status, PoolStatus::Cancelled);
        assert_eq!(pool.current_passengers, 0);

        // The rider is free to request again.
        assert!(h.engine.request_pool_ride(first_rider()).await.is_ok());
    }

    #[tokio::test]
    async fn full_trip_completes_pool() {
        let h = harness(PoolConfig::default());
        let response = h.engine.request_pool_ride(first_rider()).await.unwrap();
        let pool_id = response.pool_ride_id.unwrap();
        let rider_id = Uuid::from_u128(1);
        let driver_id = Uuid::from_u128(77);

        h.engine
            .confirm_passenger(response.passenger_id, rider_id)
            .await
            .unwrap();

        let mut rx = h.notifier.subscribe();
        let assigned = h.engine.assign_driver(pool_id, driver_id, None).await.unwrap();
        assert_eq!(assigned.status, PoolStatus::Confirmed);
        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.user_id, rider_id);
        assert_eq!(
            envelope.notification,
            Notification::PoolDriverAssigned {
                pool_ride_id: pool_id,
                driver_id,
                vehicle_id: None
            }
        );

        let picked_up = h
            .engine
            .pickup_passenger(response.passenger_id, driver_id)
            .await
            .unwrap();
        assert!(picked_up.actual_pickup_at.is_some());
        let pool = h.repository.get_pool(pool_id).await.unwrap().unwrap();
        assert_eq!(pool.status, PoolStatus::InProgress);

        let dropped = h
            .engine
            .dropoff_passenger(response.passenger_id, driver_id)
            .await
            .unwrap();
        assert_eq!(dropped.status, PassengerStatus::DroppedOff);
        let pool = h.repository.get_pool(pool_id).await.unwrap().unwrap();
        assert_eq!(pool.status, PoolStatus::Completed);
    }

    #[tokio::test]
    async fn out_of_order_transitions_are_rejected() {
        let h = harness(PoolConfig::default());
        let response = h.engine.request_pool_ride(first_rider()).await.unwrap();
        let pool_id = response.pool_ride_id.unwrap();
        let rider_id = Uuid::from_u128(1);
        let driver_id = Uuid::from_u128(77);
        h.engine.assign_driver(pool_id, driver_id, None).await.unwrap();

        let dropoff = h
            .engine
            .dropoff_passenger(response.passenger_id, driver_id)
            .await
            .unwrap_err();
        assert!(matches!(dropoff, AppError::Conflict(_)));

        let other_driver = h
            .engine
            .pickup_passenger(response.passenger_id, Uuid::from_u128(78))
            .await
            .unwrap_err();
        assert!(matches!(other_driver, AppError::Forbidden(_)));

        h.engine
            .confirm_passenger(response.passenger_id, rider_id)
            .await
            .unwrap();
        h.engine
            .pickup_passenger(response.passenger_id, driver_id)
            .await
            .unwrap();

        let cancel = h
            .engine
            .cancel_passenger(response.passenger_id, rider_id)
            .await
            .unwrap_err();
        assert!(matches!(cancel, AppError::Conflict(_)));

        let reassign = h
            .engine
            .assign_driver(pool_id, Uuid::from_u128(78), None)
            .await
            .unwrap_err();
        assert!(matches!(reassign, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn no_show_releases_seats() {
        let h = harness(sharing_config());
        let first = h.engine.request_pool_ride(first_rider()).await.unwrap();
        let second = h.engine.request_pool_ride(second_rider()).await.unwrap();
        let pool_id = first.pool_ride_id.unwrap();
        let driver_id = Uuid::from_u128(77);
        h.engine.assign_driver(pool_id, driver_id, None).await.unwrap();

        let no_show = h
            .engine
            .mark_no_show(second.passenger_id, driver_id)
            .await
            .unwrap();

        assert_eq!(no_show.status, PassengerStatus::NoShow);
        let pool = h.repository.get_pool(pool_id).await.unwrap().unwrap();
        assert_eq!(pool.current_passengers, 1);
        assert_eq!(pool.status, PoolStatus::Confirmed);
    }

    #[tokio::test]
    async fn status_hides_co_rider_locations() {
        let h = harness(sharing_config());
        let first = h.engine.request_pool_ride(first_rider()).await.unwrap();
        let second = h.engine.request_pool_ride(second_rider()).await.unwrap();
        h.engine
            .reoptimize_route(first.pool_ride_id.unwrap())
            .await
            .unwrap();

        let status = h
            .engine
            .get_pool_status(second.passenger_id, Uuid::from_u128(2))
            .await
            .unwrap();

        assert_eq!(status.passenger_status, PassengerStatus::Pending);
        assert_eq!(status.other_passenger_stops, vec![0, 1]);
        assert_eq!(status.route.len(), 4);
        assert!(status.route[..2].iter().all(|stop| stop.location.is_none()));
        assert!(status.route[2..].iter().all(|stop| stop.own && stop.location.is_some()));
        assert_eq!(status.estimated_arrival, status.route[2].estimated_arrival);
    }

    #[tokio::test]
    async fn sweep_cancels_pools_past_deadline() {
        let h = harness(PoolConfig::default());
        let mut rider = first_rider();
        rider.max_wait_minutes = Some(1);
        let response = h.engine.request_pool_ride(rider).await.unwrap();
        let mut rx = h.notifier.subscribe();

        assert_eq!(h.engine.expire_stale_pools(Utc::now()).await.unwrap(), 0);
        let expired = h
            .engine
            .expire_stale_pools(Utc::now() + Duration::minutes(2))
            .await
            .unwrap();

        assert_eq!(expired, 1);
        let pool_id = response.pool_ride_id.unwrap();
        let pool = h.repository.get_pool(pool_id).await.unwrap().unwrap();
        assert_eq!(pool.status, PoolStatus::Cancelled);
        let passenger = h
            .repository
            .get_passenger(response.passenger_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(passenger.status, PassengerStatus::Cancelled);
        assert_eq!(
            rx.try_recv().unwrap().notification,
            Notification::PoolRideCancelled { pool_ride_id: pool_id }
        );
    }
}
