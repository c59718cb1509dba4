use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use orthoflow_core::error::CoreError;
use orthoflow_core::naming::is_valid_task_id;
use orthoflow_events::{SubscriberRegistry, Subscription};

use crate::error::AppError;
use crate::state::AppState;

/// Interval between Ping frames sent to each connected client.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// HTTP handler that upgrades the connection to a progress subscription
/// for `task_id`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(task_id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    if !is_valid_task_id(&task_id) {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Invalid task id: {task_id}"
        ))));
    }

    // Subscribe before the upgrade completes so no event published in
    // between is missed.
    let subscription = state.registry.subscribe(&task_id);
    let registry = Arc::clone(&state.registry);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, task_id, subscription, registry)))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Forwards registry events, pings on [`HEARTBEAT_INTERVAL`] and ends when
/// the client closes, a send fails or the registry closes the channel.
/// The subscription is always removed on exit.
async fn handle_socket(
    socket: WebSocket,
    task_id: String,
    subscription: Subscription,
    registry: Arc<SubscriberRegistry>,
) {
    let Subscription {
        id: sub_id,
        mut receiver,
    } = subscription;
    tracing::info!(task_id = %task_id, ?sub_id, "WebSocket subscriber connected");

    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = receiver.recv() => {
                let Some(event) = event else {
                    // Registry closed the channel (shutdown or task removed).
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(task_id = %task_id, error = %e, "Failed to encode progress event");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!(task_id = %task_id, "WebSocket sink closed");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Pong(_))) => {
                    tracing::trace!(task_id = %task_id, "Pong received");
                }
                // Inbound text is ignored; the socket is publish-only.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(task_id = %task_id, error = %e, "WebSocket receive error");
                    break;
                }
            },
        }
    }

    registry.unsubscribe(&task_id, sub_id);
    tracing::info!(task_id = %task_id, ?sub_id, "WebSocket subscriber disconnected");
}
