use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    pub user_id: Uuid,
}

/// Pushes every notification addressed to `user_id`, riders and drivers alike.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.user_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut notifications = Box::pin(BroadcastStream::new(state.notifier.subscribe()).filter_map(
        move |result| async move {
            match result {
                Ok(envelope) if envelope.user_id == user_id => Some(envelope.notification),
                Ok(_) => None,
                Err(err) => {
                    warn!(user_id = %user_id, error = %err, "notification stream lagged");
                    None
                }
            }
        },
    ));

    info!(user_id = %user_id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        while let Some(notification) = notifications.next().await {
            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(user_id = %user_id, "websocket client disconnected");
}
