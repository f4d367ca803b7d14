//! WebSocket push channel
//!
//! Each connection subscribes to the event bus, receives a
//! `currentTorrents` snapshot, then every event published after that.
//! Incoming client messages are ignored apart from close frames.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use nuru_core::NuruEvent;
use tokio::sync::broadcast::error::RecvError;

use crate::server::AppState;

/// Upgrades to the push channel.
pub async fn subscribe(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| push_events(socket, state))
}

/// Serializes an event for the wire.
pub fn encode_event(event: &NuruEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!("Failed to serialize event: {e}");
            None
        }
    }
}

async fn push_events(socket: WebSocket, state: AppState) {
    // Subscribe before taking the snapshot so nothing falls in between.
    let mut events = state.manager.events().subscribe();
    let shutdown = state.lifecycle.shutdown_token();
    let (mut sender, mut receiver) = socket.split();

    let snapshot = NuruEvent::CurrentTorrents(state.manager.snapshots());
    if let Some(json) = encode_event(&snapshot)
        && sender.send(Message::Text(json.into())).await.is_err()
    {
        return;
    }
    tracing::debug!(
        subscribers = state.manager.events().subscriber_count(),
        "Push subscriber connected"
    );

    loop {
        tokio::select! {
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Push subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(json) = encode_event(&event) else {
                    continue;
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::debug!("Push subscriber disconnected");
}
