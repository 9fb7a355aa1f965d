//! WebSocket gateway for agent connections.

mod handler;
pub mod registry;

pub use handler::SessionState;

use crate::AppState;
use axum::Router;
use std::sync::Arc;

/// Agents may connect on any path; its last segment is their identity.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{*path}", axum::routing::get(handler::agent_ws_handler))
        .with_state(state)
}
