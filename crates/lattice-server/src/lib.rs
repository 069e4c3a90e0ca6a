//! HTTP + WebSocket control surface
//!
//! A thin façade: every handler calls public methods on the engine and
//! nothing else. Control-plane events reach WebSocket clients through a
//! broadcast channel fed by the engine's event subscriber.

pub mod handlers;
pub mod router;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use lattice_core::SyncEvent;
use lattice_sync::SyncEngine;
use tokio::sync::broadcast;

/// Shared state behind every route.
pub struct ServerState {
    pub engine: Arc<SyncEngine>,
    events_tx: broadcast::Sender<SyncEvent>,
}

impl ServerState {
    /// Wire the engine's event stream into a broadcast channel. Slow or
    /// absent WebSocket clients never block the engine; they just lag.
    pub fn new(engine: Arc<SyncEngine>) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        let tx = events_tx.clone();
        engine.set_event_subscriber(Box::new(move |event| {
            let _ = tx.send(event);
        }));
        Arc::new(ServerState { engine, events_tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }
}

/// Bind and serve until the process exits.
pub async fn serve(state: Arc<ServerState>, addr: SocketAddr) -> anyhow::Result<()> {
    let router = router::create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("control API listening on {addr}");
    axum::serve(listener, router).await?;
    Ok(())
}
