use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::offer::{Offer, OfferCancelReason};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    RideOffer(Offer),
    OfferCancelled {
        ride_id: Uuid,
        reason: OfferCancelReason,
    },
    NoDriversAvailable {
        ride_id: Uuid,
    },
    PoolDriverAssigned {
        pool_ride_id: Uuid,
        driver_id: Uuid,
        vehicle_id: Option<Uuid>,
    },
    PoolRideCancelled {
        pool_ride_id: Uuid,
    },
}

/// A notification addressed to one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub user_id: Uuid,
    pub notification: Notification,
}
