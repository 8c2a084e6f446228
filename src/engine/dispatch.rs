use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::adapters::{CandidateLocator, EphemeralStore, NotificationSink, RideRepository};
use crate::config::{Config, MatchingConfig};
use crate::engine::offers::{eta_minutes, eta_tracking_key, ride_status_key, OfferTracker};
use crate::error::AppError;
use crate::models::driver::Candidate;
use crate::models::notification::Notification;
use crate::models::offer::{EtaTracking, Offer, OfferCancelReason};
use crate::models::ride::{RideAccepted, RideCancelled, RideEvent, RideRequested, RideStatus};
use crate::observability::metrics::Metrics;

/// Collaborators the dispatch engine talks to.
#[derive(Clone)]
pub struct DispatchCollaborators {
    pub locator: Arc<dyn CandidateLocator>,
    pub store: Arc<dyn EphemeralStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub rides: Arc<dyn RideRepository>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Nobody was close enough; the rider has been told.
    NoDrivers,
    /// The ride was accepted or cancelled before its request was handled.
    Settled(RideStatus),
    Offered {
        immediate: Vec<Uuid>,
        deferred: Vec<Uuid>,
        /// The delayed second batch, if any. Dropping the handle leaves the
        /// task running.
        delayed_batch: Option<JoinHandle<usize>>,
    },
}

/// The delayed batch only goes out while the ride is still waiting for a driver.
pub fn should_send_delayed_batch(status: Option<RideStatus>) -> bool {
    matches!(status, Some(RideStatus::Requested | RideStatus::Pending))
}

#[derive(Clone)]
pub struct DispatchEngine {
    collaborators: DispatchCollaborators,
    offers: OfferTracker,
    config: MatchingConfig,
    ride_status_ttl: Duration,
    eta_tracking_ttl: Duration,
    metrics: Metrics,
}

impl DispatchEngine {
    pub fn new(config: &Config, collaborators: DispatchCollaborators, metrics: Metrics) -> Self {
        let offers = OfferTracker::new(
            collaborators.store.clone(),
            collaborators.notifier.clone(),
            &config.matching,
        );

        Self {
            collaborators,
            offers,
            config: config.matching.clone(),
            ride_status_ttl: Duration::from_secs(config.service.ride_status_ttl_seconds),
            eta_tracking_ttl: Duration::from_secs(config.service.eta_tracking_ttl_seconds),
            metrics,
        }
    }

    pub async fn handle_event(&self, event: RideEvent) -> Result<(), AppError> {
        match event {
            RideEvent::Requested(request) => self.handle_ride_requested(&request).await.map(|_| ()),
            RideEvent::Accepted(accepted) => self.handle_ride_accepted(&accepted).await,
            RideEvent::Cancelled(cancelled) => self.handle_ride_cancelled(&cancelled).await,
        }
    }

    pub async fn handle_ride_requested(
        &self,
        request: &RideRequested,
    ) -> Result<DispatchOutcome, AppError> {
        let start = Instant::now();
        let result = self.dispatch(request).await;

        let outcome = match &result {
            Ok(DispatchOutcome::NoDrivers) => "no_drivers",
            Ok(DispatchOutcome::Settled(_)) => "settled",
            Ok(DispatchOutcome::Offered { .. }) => "offered",
            Err(_) => "error",
        };
        self.metrics
            .dispatch_latency_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
        self.metrics
            .dispatch_cycles_total
            .with_label_values(&[outcome])
            .inc();

        result
    }

    async fn dispatch(&self, request: &RideRequested) -> Result<DispatchOutcome, AppError> {
        match self.current_ride_status(request.ride_id).await {
            Some(status) if !should_send_delayed_batch(Some(status)) => {
                info!(ride_id = %request.ride_id, status = ?status, "ride already settled; not dispatching");
                return Ok(DispatchOutcome::Settled(status));
            }
            _ => {}
        }
        self.mark_pending(request.ride_id).await;

        let candidates = self
            .collaborators
            .locator
            .find_available_drivers(&request.pickup, self.config.max_drivers_to_notify)
            .await
            .map_err(|err| {
                error!(ride_id = %request.ride_id, error = %err, "candidate search failed");
                AppError::from(err)
            })?;

        if candidates.is_empty() {
            warn!(ride_id = %request.ride_id, "no drivers available");
            if let Err(err) = self
                .collaborators
                .notifier
                .send_to_user(
                    request.rider_id,
                    Notification::NoDriversAvailable {
                        ride_id: request.ride_id,
                    },
                )
                .await
            {
                warn!(ride_id = %request.ride_id, error = %err, "failed to notify rider");
            }
            return Ok(DispatchOutcome::NoDrivers);
        }

        let mut ranked = self.rank_candidates(request, candidates);
        let deferred = ranked.split_off(self.config.first_batch_size.min(ranked.len()));

        let immediate: Vec<Uuid> = ranked.iter().map(|c| c.driver_id).collect();
        self.send_batch(request, &ranked).await;

        let deferred_ids: Vec<Uuid> = deferred.iter().map(|c| c.driver_id).collect();
        let delayed_batch = (!deferred.is_empty()).then(|| self.schedule_delayed_batch(request, deferred));

        info!(
            ride_id = %request.ride_id,
            immediate = immediate.len(),
            deferred = deferred_ids.len(),
            "ride offers sent"
        );

        Ok(DispatchOutcome::Offered {
            immediate,
            deferred: deferred_ids,
            delayed_batch,
        })
    }

    /// Nearest first, with live distance and ETA filled in, capped at the
    /// notification limit.
    fn rank_candidates(&self, request: &RideRequested, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let mut ranked: Vec<Candidate> = candidates
            .into_iter()
            .map(|mut candidate| {
                let distance = self
                    .collaborators
                    .locator
                    .calculate_distance(&candidate.location, &request.pickup);
                candidate.distance_km = Some(distance);
                candidate.eta_minutes = Some(eta_minutes(distance));
                candidate
            })
            .collect();

        ranked.sort_by(|a, b| {
            a.distance_km
                .unwrap_or(f64::MAX)
                .total_cmp(&b.distance_km.unwrap_or(f64::MAX))
        });
        ranked.dedup_by_key(|candidate| candidate.driver_id);
        ranked.truncate(self.config.max_drivers_to_notify);
        ranked
    }

    fn schedule_delayed_batch(
        &self,
        request: &RideRequested,
        deferred: Vec<Candidate>,
    ) -> JoinHandle<usize> {
        let engine = self.clone();
        let request = request.clone();
        let delay = self.config.retry_delay();

        tokio::spawn(async move {
            sleep(delay).await;

            let status = engine.current_ride_status(request.ride_id).await;
            if !should_send_delayed_batch(status) {
                info!(
                    ride_id = %request.ride_id,
                    status = ?status,
                    "ride no longer pending; delayed offers skipped"
                );
                return 0;
            }

            engine.send_batch(&request, &deferred).await
        })
    }

    async fn send_batch(&self, request: &RideRequested, candidates: &[Candidate]) -> usize {
        for candidate in candidates {
            let offer = self.build_offer(request, candidate);
            self.offers.deliver(&offer).await;
            self.metrics
                .offers_sent_total
                .with_label_values(&["sent"])
                .inc();
            debug!(
                ride_id = %request.ride_id,
                driver_id = %candidate.driver_id,
                eta_minutes = offer.eta_minutes,
                "offer sent"
            );
        }
        candidates.len()
    }

    fn build_offer(&self, request: &RideRequested, candidate: &Candidate) -> Offer {
        let distance = self
            .collaborators
            .locator
            .calculate_distance(&candidate.location, &request.pickup);
        let timeout = self.config.offer_timeout_seconds;

        Offer {
            ride_id: request.ride_id,
            driver_id: candidate.driver_id,
            rider_id: request.rider_id,
            rider_name: request.rider_name.clone(),
            pickup: request.pickup,
            dropoff: request.dropoff,
            pickup_address: request.pickup_address.clone(),
            dropoff_address: request.dropoff_address.clone(),
            estimated_fare: request.estimated_fare,
            estimated_distance_km: request.estimated_distance_km,
            estimated_duration_minutes: request.estimated_duration_minutes,
            distance_to_pickup_km: distance,
            eta_minutes: eta_minutes(distance),
            expires_at: Utc::now() + chrono::Duration::seconds(timeout as i64),
            timeout_seconds: timeout,
        }
    }

    /// Cached hint first. A hint still waiting for a driver is checked against
    /// the ride record, which wins when it has moved on or the hint is gone.
    pub async fn current_ride_status(&self, ride_id: Uuid) -> Option<RideStatus> {
        match self.status_hint(ride_id).await {
            Some(status) if !should_send_delayed_batch(Some(status)) => Some(status),
            hint => self.recorded_status(ride_id).await.or(hint),
        }
    }

    async fn status_hint(&self, ride_id: Uuid) -> Option<RideStatus> {
        match self.collaborators.store.get(&ride_status_key(ride_id)).await {
            Ok(Some(raw)) => {
                let status = RideStatus::parse(&raw);
                if status.is_none() {
                    warn!(ride_id = %ride_id, raw = %raw, "unreadable ride status hint");
                }
                status
            }
            Ok(None) => None,
            Err(err) => {
                warn!(ride_id = %ride_id, error = %err, "ride status cache unavailable");
                None
            }
        }
    }

    async fn recorded_status(&self, ride_id: Uuid) -> Option<RideStatus> {
        match self.collaborators.rides.ride_status(ride_id).await {
            Ok(status) => status,
            Err(err) => {
                warn!(ride_id = %ride_id, error = %err, "ride status lookup failed");
                None
            }
        }
    }

    /// Writes `pending` only over a missing or `requested` hint; an accepted
    /// or cancelled hint is never downgraded.
    async fn mark_pending(&self, ride_id: Uuid) {
        match self.status_hint(ride_id).await {
            None | Some(RideStatus::Requested) => {
                self.set_status_hint(ride_id, RideStatus::Pending).await
            }
            Some(_) => {}
        }
    }

    pub async fn handle_ride_accepted(&self, accepted: &RideAccepted) -> Result<(), AppError> {
        self.set_status_hint(accepted.ride_id, RideStatus::Accepted).await;

        let withdrawn = self
            .offers
            .withdraw_all(
                accepted.ride_id,
                Some(accepted.driver_id),
                OfferCancelReason::RideTaken,
            )
            .await?;
        self.metrics.offer_cancellations_total.inc_by(withdrawn as u64);

        let tracking = EtaTracking {
            ride_id: accepted.ride_id,
            pickup: accepted.pickup,
            registered_at: Utc::now(),
        };
        if let Err(err) = self
            .collaborators
            .store
            .set_with_expiration(
                &eta_tracking_key(accepted.driver_id),
                serde_json::to_string(&tracking).map_err(|err| AppError::Internal(err.to_string()))?,
                self.eta_tracking_ttl,
            )
            .await
        {
            warn!(driver_id = %accepted.driver_id, error = %err, "failed to register eta tracking");
        }

        info!(
            ride_id = %accepted.ride_id,
            driver_id = %accepted.driver_id,
            withdrawn,
            "ride accepted"
        );
        Ok(())
    }

    pub async fn handle_ride_cancelled(&self, cancelled: &RideCancelled) -> Result<(), AppError> {
        self.set_status_hint(cancelled.ride_id, RideStatus::Cancelled).await;

        let withdrawn = self
            .offers
            .withdraw_all(cancelled.ride_id, None, OfferCancelReason::RideCancelled)
            .await?;
        self.metrics.offer_cancellations_total.inc_by(withdrawn as u64);

        if let Some(driver_id) = cancelled.driver_id {
            self.clear_eta_tracking(driver_id, cancelled.ride_id).await;
        }

        info!(ride_id = %cancelled.ride_id, withdrawn, "ride cancelled");
        Ok(())
    }

    async fn clear_eta_tracking(&self, driver_id: Uuid, ride_id: Uuid) {
        let key = eta_tracking_key(driver_id);
        let tracked_ride = match self.collaborators.store.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str::<EtaTracking>(&raw).ok().map(|t| t.ride_id),
            Ok(None) => return,
            Err(err) => {
                warn!(driver_id = %driver_id, error = %err, "failed to read eta tracking");
                return;
            }
        };

        // The driver may already be tracked for a newer ride.
        if tracked_ride.is_some_and(|tracked| tracked != ride_id) {
            return;
        }
        if let Err(err) = self.collaborators.store.delete(&key).await {
            warn!(driver_id = %driver_id, error = %err, "failed to clear eta tracking");
        }
    }

    async fn set_status_hint(&self, ride_id: Uuid, status: RideStatus) {
        if let Err(err) = self
            .collaborators
            .store
            .set_with_expiration(
                &ride_status_key(ride_id),
                status.as_str().to_string(),
                self.ride_status_ttl,
            )
            .await
        {
            warn!(ride_id = %ride_id, error = %err, "failed to cache ride status");
        }
    }
}

/// Consumes ride lifecycle events; each event is handled on its own task so
/// rides never wait on each other.
pub async fn run_dispatch_engine(
    engine: DispatchEngine,
    metrics: Metrics,
    mut event_rx: mpsc::Receiver<RideEvent>,
) {
    info!("dispatch engine started");

    while let Some(event) = event_rx.recv().await {
        metrics.ride_events_in_queue.dec();

        let engine = engine.clone();
        tokio::spawn(async move {
            let ride_id = event.ride_id();
            let kind = event.kind();
            if let Err(err) = engine.handle_event(event).await {
                error!(ride_id = %ride_id, event = kind, error = %err, "failed to handle ride event");
            }
        });
    }

    warn!("dispatch engine stopped: event channel closed");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    use super::{should_send_delayed_batch, DispatchCollaborators, DispatchEngine, DispatchOutcome};
    use crate::adapters::fleet::DriverFleet;
    use crate::adapters::notify::BroadcastNotifier;
    use crate::adapters::repository::RideBook;
    use crate::adapters::store::MemoryStore;
    use crate::adapters::EphemeralStore;
    use crate::config::Config;
    use crate::engine::offers::{eta_tracking_key, offer_key, offer_set_key, ride_status_key};
    use crate::models::driver::{Driver, DriverStatus, GeoPoint};
    use crate::models::notification::{Envelope, Notification};
    use crate::models::offer::{OfferCancelReason, OfferSet};
    use crate::models::ride::{Ride, RideAccepted, RideCancelled, RideRequested, RideStatus};
    use crate::observability::metrics::Metrics;

    struct Harness {
        engine: DispatchEngine,
        fleet: Arc<DriverFleet>,
        store: Arc<MemoryStore>,
        rides: Arc<RideBook>,
        events: broadcast::Receiver<Envelope>,
    }

    fn harness(config: Config) -> Harness {
        let fleet = Arc::new(DriverFleet::new(&config.matching));
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(BroadcastNotifier::new(256));
        let rides = Arc::new(RideBook::new());
        let events = notifier.subscribe();

        let engine = DispatchEngine::new(
            &config,
            DispatchCollaborators {
                locator: fleet.clone(),
                store: store.clone(),
                notifier,
                rides: rides.clone(),
            },
            Metrics::new(),
        );

        Harness {
            engine,
            fleet,
            store,
            rides,
            events,
        }
    }

    fn add_drivers(fleet: &DriverFleet, count: u128) {
        for seed in 1..=count {
            fleet.upsert(Driver {
                id: Uuid::from_u128(seed),
                name: format!("driver-{seed}"),
                // Further away as the seed grows.
                location: GeoPoint::new(52.52 + seed as f64 * 0.002, 13.405),
                status: DriverStatus::Available,
                updated_at: Utc::now(),
            });
        }
    }

    fn ride_request() -> RideRequested {
        RideRequested {
            ride_id: Uuid::new_v4(),
            rider_id: Uuid::from_u128(1_000),
            rider_name: "Rita".to_string(),
            pickup: GeoPoint::new(52.52, 13.405),
            dropoff: Some(GeoPoint::new(52.55, 13.45)),
            pickup_address: None,
            dropoff_address: None,
            estimated_fare: 14.5,
            estimated_distance_km: 6.0,
            estimated_duration_minutes: 15.0,
            requested_at: Utc::now(),
        }
    }

    fn ride_record(request: &RideRequested, status: RideStatus) -> Ride {
        Ride {
            id: request.ride_id,
            rider_id: request.rider_id,
            rider_name: request.rider_name.clone(),
            pickup: request.pickup,
            dropoff: request.dropoff,
            pickup_address: None,
            dropoff_address: None,
            estimated_fare: request.estimated_fare,
            estimated_distance_km: request.estimated_distance_km,
            estimated_duration_minutes: request.estimated_duration_minutes,
            status,
            driver_id: None,
            created_at: Utc::now(),
        }
    }

    fn drain(events: &mut broadcast::Receiver<Envelope>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            out.push(envelope);
        }
        out
    }

    async fn offer_set(store: &MemoryStore, ride_id: Uuid) -> Option<OfferSet> {
        store
            .get(&offer_set_key(ride_id))
            .await
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    #[test]
    fn delayed_batch_only_for_pending_rides() {
        assert!(should_send_delayed_batch(Some(RideStatus::Pending)));
        assert!(should_send_delayed_batch(Some(RideStatus::Requested)));
        assert!(!should_send_delayed_batch(Some(RideStatus::Accepted)));
        assert!(!should_send_delayed_batch(Some(RideStatus::Cancelled)));
        assert!(!should_send_delayed_batch(None));
    }

    #[tokio::test]
    async fn no_candidates_notifies_rider_once_and_creates_no_offer_set() {
        let mut h = harness(Config::default());
        let request = ride_request();

        let outcome = h.engine.handle_ride_requested(&request).await.unwrap();

        assert!(matches!(outcome, DispatchOutcome::NoDrivers));
        let sent = drain(&mut h.events);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, request.rider_id);
        assert_eq!(
            sent[0].notification,
            Notification::NoDriversAvailable {
                ride_id: request.ride_id
            }
        );
        assert!(offer_set(&h.store, request.ride_id).await.is_none());
    }

    #[tokio::test]
    async fn first_batch_goes_to_nearest_drivers_immediately() {
        let mut config = Config::default();
        config.matching.first_batch_size = 2;
        config.matching.retry_delay_seconds = 3600;
        let mut h = harness(config);
        add_drivers(&h.fleet, 5);
        let request = ride_request();

        let outcome = h.engine.handle_ride_requested(&request).await.unwrap();

        let DispatchOutcome::Offered {
            immediate, deferred, ..
        } = outcome
        else {
            panic!("expected offers");
        };
        assert_eq!(immediate, vec![Uuid::from_u128(1), Uuid::from_u128(2)]);
        assert_eq!(deferred.len(), 3);

        let offered: Vec<Uuid> = drain(&mut h.events)
            .into_iter()
            .filter_map(|envelope| match envelope.notification {
                Notification::RideOffer(offer) => Some(offer.driver_id),
                _ => None,
            })
            .collect();
        assert_eq!(offered, immediate);

        let set = offer_set(&h.store, request.ride_id).await.unwrap();
        assert_eq!(set.driver_ids, immediate);
    }

    #[tokio::test]
    async fn delayed_batch_follows_while_ride_is_pending() {
        let mut config = Config::default();
        config.matching.first_batch_size = 2;
        config.matching.retry_delay_seconds = 0;
        let h = harness(config);
        add_drivers(&h.fleet, 4);
        let request = ride_request();

        let outcome = h.engine.handle_ride_requested(&request).await.unwrap();
        let DispatchOutcome::Offered {
            delayed_batch: Some(handle),
            ..
        } = outcome
        else {
            panic!("expected a delayed batch");
        };

        assert_eq!(handle.await.unwrap(), 2);
        let set = offer_set(&h.store, request.ride_id).await.unwrap();
        assert_eq!(set.driver_ids.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_batch_is_skipped_after_acceptance() {
        let mut config = Config::default();
        config.matching.first_batch_size = 1;
        config.matching.retry_delay_seconds = 1;
        let h = harness(config);
        add_drivers(&h.fleet, 3);
        let request = ride_request();

        let outcome = h.engine.handle_ride_requested(&request).await.unwrap();
        h.engine
            .handle_ride_accepted(&RideAccepted {
                ride_id: request.ride_id,
                rider_id: request.rider_id,
                driver_id: Uuid::from_u128(1),
                pickup: request.pickup,
                accepted_at: Utc::now(),
            })
            .await
            .unwrap();

        let DispatchOutcome::Offered {
            delayed_batch: Some(handle),
            ..
        } = outcome
        else {
            panic!("expected a delayed batch");
        };
        assert_eq!(handle.await.unwrap(), 0);
        assert!(offer_set(&h.store, request.ride_id).await.is_none());
    }

    #[tokio::test]
    async fn status_falls_back_to_ride_record_when_hint_is_missing() {
        let h = harness(Config::default());
        let request = ride_request();
        h.rides.insert(ride_record(&request, RideStatus::Cancelled));

        assert_eq!(
            h.engine.current_ride_status(request.ride_id).await,
            Some(RideStatus::Cancelled)
        );
        assert_eq!(h.engine.current_ride_status(Uuid::new_v4()).await, None);
    }

    #[tokio::test]
    async fn cancel_handled_before_request_keeps_ride_cancelled() {
        let mut config = Config::default();
        config.matching.first_batch_size = 1;
        config.matching.retry_delay_seconds = 0;
        let mut h = harness(config);
        add_drivers(&h.fleet, 3);
        let request = ride_request();
        h.rides.insert(ride_record(&request, RideStatus::Cancelled));

        h.engine
            .handle_ride_cancelled(&RideCancelled {
                ride_id: request.ride_id,
                rider_id: request.rider_id,
                driver_id: None,
                cancelled_at: Utc::now(),
            })
            .await
            .unwrap();
        let outcome = h.engine.handle_ride_requested(&request).await.unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::Settled(RideStatus::Cancelled)
        ));
        assert_eq!(
            h.store.get(&ride_status_key(request.ride_id)).await.unwrap().as_deref(),
            Some("cancelled")
        );
        assert!(offer_set(&h.store, request.ride_id).await.is_none());
        assert!(drain(&mut h.events)
            .iter()
            .all(|envelope| !matches!(envelope.notification, Notification::RideOffer(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_batch_trusts_ride_record_over_pending_hint() {
        let mut config = Config::default();
        config.matching.first_batch_size = 1;
        config.matching.retry_delay_seconds = 1;
        let h = harness(config);
        add_drivers(&h.fleet, 3);
        let request = ride_request();
        h.rides.insert(ride_record(&request, RideStatus::Requested));

        let outcome = h.engine.handle_ride_requested(&request).await.unwrap();
        assert_eq!(
            h.store.get(&ride_status_key(request.ride_id)).await.unwrap().as_deref(),
            Some("pending")
        );
        // Cancelled on the record while the cancel event is still in flight.
        assert!(h
            .rides
            .transition(&request.ride_id, &[RideStatus::Requested], |ride| {
                ride.status = RideStatus::Cancelled
            })
            .is_some_and(|result| result.is_ok()));

        let DispatchOutcome::Offered {
            delayed_batch: Some(handle),
            ..
        } = outcome
        else {
            panic!("expected a delayed batch");
        };
        assert_eq!(handle.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn never_offers_more_than_the_notification_limit() {
        let mut config = Config::default();
        config.matching.max_drivers_to_notify = 4;
        config.matching.first_batch_size = 10;
        let mut h = harness(config);
        add_drivers(&h.fleet, 9);

        h.engine.handle_ride_requested(&ride_request()).await.unwrap();

        let offers = drain(&mut h.events)
            .into_iter()
            .filter(|envelope| matches!(envelope.notification, Notification::RideOffer(_)))
            .count();
        assert_eq!(offers, 4);
    }

    #[tokio::test]
    async fn acceptance_withdraws_other_offers_and_clears_offer_set() {
        let mut config = Config::default();
        config.matching.first_batch_size = 3;
        let mut h = harness(config);
        add_drivers(&h.fleet, 3);
        let request = ride_request();
        h.engine.handle_ride_requested(&request).await.unwrap();
        drain(&mut h.events);

        let winner = Uuid::from_u128(2);
        h.engine
            .handle_ride_accepted(&RideAccepted {
                ride_id: request.ride_id,
                rider_id: request.rider_id,
                driver_id: winner,
                pickup: request.pickup,
                accepted_at: Utc::now(),
            })
            .await
            .unwrap();

        let withdrawn: Vec<Uuid> = drain(&mut h.events)
            .into_iter()
            .filter(|envelope| {
                envelope.notification
                    == Notification::OfferCancelled {
                        ride_id: request.ride_id,
                        reason: OfferCancelReason::RideTaken,
                    }
            })
            .map(|envelope| envelope.user_id)
            .collect();
        assert_eq!(withdrawn, vec![Uuid::from_u128(1), Uuid::from_u128(3)]);

        for loser in [Uuid::from_u128(1), Uuid::from_u128(3)] {
            assert!(h.store.get(&offer_key(request.ride_id, loser)).await.unwrap().is_none());
        }
        assert!(offer_set(&h.store, request.ride_id).await.is_none());
        assert!(h.store.get(&eta_tracking_key(winner)).await.unwrap().is_some());
        assert_eq!(
            h.engine.current_ride_status(request.ride_id).await,
            Some(RideStatus::Accepted)
        );
    }

    #[tokio::test]
    async fn cancellation_withdraws_every_offer() {
        let mut h = harness(Config::default());
        add_drivers(&h.fleet, 2);
        let request = ride_request();
        h.engine.handle_ride_requested(&request).await.unwrap();
        drain(&mut h.events);

        h.engine
            .handle_ride_cancelled(&RideCancelled {
                ride_id: request.ride_id,
                rider_id: request.rider_id,
                driver_id: None,
                cancelled_at: Utc::now(),
            })
            .await
            .unwrap();

        let withdrawn = drain(&mut h.events)
            .into_iter()
            .filter(|envelope| matches!(envelope.notification, Notification::OfferCancelled { .. }))
            .count();
        assert_eq!(withdrawn, 2);
        assert!(offer_set(&h.store, request.ride_id).await.is_none());
    }

    #[tokio::test]
    async fn repeated_acceptance_is_idempotent() {
        let h = harness(Config::default());
        let accepted = RideAccepted {
            ride_id: Uuid::new_v4(),
            rider_id: Uuid::new_v4(),
            driver_id: Uuid::new_v4(),
            pickup: GeoPoint::new(52.52, 13.405),
            accepted_at: Utc::now(),
        };

        h.engine.handle_ride_accepted(&accepted).await.unwrap();
        h.engine.handle_ride_accepted(&accepted).await.unwrap();
    }
}
