//! HTTP and WebSocket routes

pub mod download;
pub mod health;
pub mod socket;

use axum::Router;

use crate::state::AppState;

/// Assemble every route; middleware layers are added by the caller
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(socket::router())
        .merge(download::router())
        .with_state(state)
}
