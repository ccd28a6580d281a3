//! Rovelink signaling relay.
//!
//! Registers websocket connections by role and routes handshake messages between a device and
//! its viewer. Media never passes through the relay.

#![forbid(unsafe_code)]

pub mod registry;
pub mod router;
pub mod signal;

use axum::{
    extract::State,
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use rovelink_common::Role;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use registry::{ConnectionId, ConnectionRegistry};
pub use router::{Delivery, MessageRouter, RouteError};
pub use signal::Relay;

#[derive(Debug, Serialize)]
struct HealthReport {
    active_connections: usize,
    device_registered: bool,
}

async fn health(State(relay): State<Relay>) -> impl IntoResponse {
    Json(HealthReport {
        active_connections: relay.connection_count().await,
        device_registered: relay.lookup(Role::Device).await.is_some(),
    })
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

/// HTTP surface of the relay: `/ws` for signaling, `/health` for liveness.
pub fn app(relay: Relay) -> Router {
    Router::new()
        .route("/", get(|| async { "Rovelink signaling relay" }))
        .route("/health", get(health))
        .route("/ws", get(signal::ws_handler))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

/// Serves the relay on an already bound listener until the process exits.
pub async fn serve(listener: TcpListener, relay: Relay) -> std::io::Result<()> {
    axum::serve(
        listener,
        app(relay).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// Websocket URL clients should use for a relay bound to `bound_addr`.
pub fn ws_signaling_url_for_bound_addr(bound_addr: SocketAddr) -> String {
    let host = if bound_addr.ip().is_unspecified() {
        "127.0.0.1".to_string()
    } else {
        bound_addr.ip().to_string()
    };
    format!("ws://{}:{}/ws", host, bound_addr.port())
}
