//! Offer bookkeeping in the ephemeral store.
//!
//! Keys:
//! - `dispatch:offer:{ride}:{driver}` -> [`TrackedOffer`], lives as long as the offer.
//! - `dispatch:offers:{ride}` -> [`OfferSet`], outlives the longest offer by a grace period.
//! - `dispatch:ride_status:{ride}` -> bare status string.
//! - `dispatch:eta_tracking:{driver}` -> [`crate::models::offer::EtaTracking`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapters::{AdapterError, EphemeralStore, NotificationSink};
use crate::config::MatchingConfig;
use crate::models::notification::Notification;
use crate::models::offer::{Offer, OfferCancelReason, OfferSet, TrackedOffer};

const AVERAGE_PICKUP_SPEED_KMH: f64 = 30.0;

pub fn offer_key(ride_id: Uuid, driver_id: Uuid) -> String {
    format!("dispatch:offer:{ride_id}:{driver_id}")
}

pub fn offer_set_key(ride_id: Uuid) -> String {
    format!("dispatch:offers:{ride_id}")
}

pub fn ride_status_key(ride_id: Uuid) -> String {
    format!("dispatch:ride_status:{ride_id}")
}

pub fn eta_tracking_key(driver_id: Uuid) -> String {
    format!("dispatch:eta_tracking:{driver_id}")
}

/// Minutes to reach the pickup at a flat 30 km/h, rounded up.
pub fn eta_minutes(distance_km: f64) -> i64 {
    (distance_km.max(0.0) * 60.0 / AVERAGE_PICKUP_SPEED_KMH).ceil() as i64
}

#[derive(Clone)]
pub struct OfferTracker {
    store: Arc<dyn EphemeralStore>,
    notifier: Arc<dyn NotificationSink>,
    offer_ttl: Duration,
    offer_set_ttl: Duration,
}

impl OfferTracker {
    pub fn new(
        store: Arc<dyn EphemeralStore>,
        notifier: Arc<dyn NotificationSink>,
        config: &MatchingConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            offer_ttl: config.offer_timeout(),
            offer_set_ttl: config.offer_set_ttl(),
        }
    }

    /// Records the offer, then pushes it to the driver. Neither step rolls the
    /// other back; failures are only logged.
    pub async fn deliver(&self, offer: &Offer) {
        if let Err(err) = self.track(offer).await {
            warn!(
                ride_id = %offer.ride_id,
                driver_id = %offer.driver_id,
                error = %err,
                "failed to track offer"
            );
        }

        if let Err(err) = self
            .notifier
            .send_to_user(offer.driver_id, Notification::RideOffer(offer.clone()))
            .await
        {
            warn!(
                ride_id = %offer.ride_id,
                driver_id = %offer.driver_id,
                error = %err,
                "failed to deliver offer"
            );
        }
    }

    async fn track(&self, offer: &Offer) -> Result<(), AdapterError> {
        let tracked = TrackedOffer {
            driver_id: offer.driver_id,
            sent_at: Utc::now(),
            expires_at: offer.expires_at,
        };
        self.store
            .set_with_expiration(
                &offer_key(offer.ride_id, offer.driver_id),
                serde_json::to_string(&tracked)?,
                self.offer_ttl,
            )
            .await?;

        // Read-modify-write without a lock: two batches appending for the same
        // ride at once can drop a driver id, leaving that offer to expire on
        // its own instead of being withdrawn.
        let set_key = offer_set_key(offer.ride_id);
        let mut offer_set = match self.store.get(&set_key).await? {
            Some(raw) => serde_json::from_str::<OfferSet>(&raw)?,
            None => OfferSet::new(offer.ride_id),
        };
        offer_set.insert(offer.driver_id);

        self.store
            .set_with_expiration(&set_key, serde_json::to_string(&offer_set)?, self.offer_set_ttl)
            .await
    }

    /// Tells every driver still holding an offer for the ride that it is gone,
    /// except `accepted_driver`, and clears their records. Returns the number
    /// of drivers notified. An absent offer set is a no-op.
    pub async fn withdraw_all(
        &self,
        ride_id: Uuid,
        accepted_driver: Option<Uuid>,
        reason: OfferCancelReason,
    ) -> Result<usize, AdapterError> {
        let set_key = offer_set_key(ride_id);
        let Some(raw) = self.store.get(&set_key).await? else {
            debug!(ride_id = %ride_id, "no outstanding offers");
            return Ok(0);
        };
        let offer_set: OfferSet = serde_json::from_str(&raw)?;

        let mut withdrawn = 0;
        for driver_id in offer_set
            .driver_ids
            .into_iter()
            .filter(|driver_id| Some(*driver_id) != accepted_driver)
        {
            if let Err(err) = self
                .notifier
                .send_to_user(driver_id, Notification::OfferCancelled { ride_id, reason })
                .await
            {
                warn!(ride_id = %ride_id, driver_id = %driver_id, error = %err, "failed to notify offer withdrawal");
            }

            if let Err(err) = self.store.delete(&offer_key(ride_id, driver_id)).await {
                warn!(ride_id = %ride_id, driver_id = %driver_id, error = %err, "failed to delete tracked offer");
            }
            withdrawn += 1;
        }

        self.store.delete(&set_key).await?;
        Ok(withdrawn)
    }
}
