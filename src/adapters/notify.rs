use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::adapters::{AdapterError, NotificationSink};
use crate::models::notification::{Envelope, Notification};

/// Publishes notifications to every subscriber; each subscriber filters by
/// the user it serves.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastNotifier {
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer_size.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn send_to_user(
        &self,
        user_id: Uuid,
        notification: Notification,
    ) -> Result<(), AdapterError> {
        // No subscriber means nobody is connected; delivery is at-most-once.
        if self
            .tx
            .send(Envelope {
                user_id,
                notification,
            })
            .is_err()
        {
            debug!(user_id = %user_id, "notification dropped: no subscribers");
        }
        Ok(())
    }
}
