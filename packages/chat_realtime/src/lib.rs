//! Realtime presence and message fanout for chat conversations.
//!
//! Clients hold one WebSocket each, authenticate with an access token on the
//! first frame, and then receive presence changes, typing indicators, and
//! request-layer notifications for the conversations they belong to.

use std::sync::Arc;

use axum::{Router, routing::get};

pub mod config;
pub mod db;
pub mod directory;
pub mod handlers;
pub mod metrics;
pub mod repository;
pub mod ws;

#[cfg(test)]
mod test_helpers;

use db::Database;
use metrics::ServerMetrics;
use ws::RealtimeHub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RealtimeHub>,
    pub db: Arc<Database>,
    pub metrics: Arc<ServerMetrics>,
}

/// All routes, with state applied. Middleware layers are added by the binary.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(handlers::websocket_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .route("/api/presence", get(handlers::list_presence_handler))
        .route("/api/presence/{user_id}", get(handlers::user_presence_handler))
        .with_state(state)
}
