//! WebSocket event stream
//!
//! Clients get a `connected` event on upgrade, then every control-plane
//! event the engine publishes. The receive side is only read to notice
//! disconnects.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use lattice_core::SyncEvent;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::ServerState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    debug!("websocket client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.subscribe();

    if let Ok(welcome) = serde_json::to_string(&SyncEvent::connected()) {
        if sender.send(Message::Text(welcome)).await.is_err() {
            return;
        }
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if let Message::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    debug!("websocket client disconnected");
}

#[cfg(test)]
mod tests {
    use lattice_core::{SyncEvent, SyncEventKind};

    #[test]
    fn connected_event_serializes_with_type_tag() {
        let json = serde_json::to_string(&SyncEvent::connected()).unwrap();
        assert!(json.contains("\"type\":\"connected\""));
    }

    #[test]
    fn path_events_carry_the_path() {
        let event =
            SyncEvent::for_path(SyncEventKind::Modify, std::path::Path::new("src/a.ts"));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"modify\""));
        assert!(json.contains("src/a.ts"));
    }
}
