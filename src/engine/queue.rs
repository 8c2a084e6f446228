use crate::error::AppError;
use crate::models::ride::RideEvent;
use crate::state::AppState;

pub async fn enqueue_event(state: &AppState, event: RideEvent) -> Result<(), AppError> {
    state
        .event_tx
        .send(event)
        .await
        .map_err(|err| AppError::Internal(format!("ride event queue send failed: {err}")))?;

    state.metrics.ride_events_in_queue.inc();
    Ok(())
}
