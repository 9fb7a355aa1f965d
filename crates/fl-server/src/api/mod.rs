//! API routes module.

mod health;
mod robots;

use crate::AppState;
use axum::Router;
use std::sync::Arc;

/// Build the API router with all sub-routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/robots", robots::router(state.clone()))
        .merge(health::router(state))
}
