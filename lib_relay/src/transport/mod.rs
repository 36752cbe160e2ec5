//! # WebSocket Transport
//!
//! The HTTP side of the relay: an axum `Router` that upgrades requests on `/`
//! and `/ws` to WebSockets and hands each socket to [`ws::handle_socket`],
//! plus two plain endpoints for operators (`/health`, `/status`).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;

use crate::core::LifecycleCoordinator;

/// Per-connection WebSocket handling.
pub mod ws;

pub use ws::WsConnection;

/// Knobs for the per-connection outbound path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportSettings {
    /// Capacity of each connection's outbound queue, in messages.
    pub outbound_queue: usize,
    /// Deadline for writing one frame to a peer before it is force-closed.
    pub send_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            outbound_queue: 256,
            send_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
struct RelayState {
    coordinator: Arc<LifecycleCoordinator>,
    settings: TransportSettings,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    connections: usize,
    ts: String,
}

/// Builds the relay's router around `coordinator`.
pub fn router(coordinator: Arc<LifecycleCoordinator>, settings: TransportSettings) -> Router {
    let state = RelayState {
        coordinator,
        settings,
    };

    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

/// # Serve
///
/// Accepts connections on `listener` until `shutdown` resolves. When it does,
/// every open WebSocket is force-closed through the coordinator and the
/// listener stops accepting.
pub async fn serve<F>(
    listener: TcpListener,
    coordinator: Arc<LifecycleCoordinator>,
    settings: TransportSettings,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("Relay listening on {}", addr);
    }

    let app = router(Arc::clone(&coordinator), settings);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("Relay shutting down, closing open connections.");
            coordinator.close_all();
        })
        .await
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws::handle_socket(socket, state.coordinator, state.settings))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn status_handler(State(state): State<RelayState>) -> impl IntoResponse {
    Json(StatusResponse {
        connections: state.coordinator.connection_count(),
        ts: chrono::Utc::now().to_rfc3339(),
    })
}
