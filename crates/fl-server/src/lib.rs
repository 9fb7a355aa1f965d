//! # fleetlink coordinator
//!
//! Accepts WebSocket connections from robot agents, routes their text
//! envelopes and binary artifacts, and sends them commands over the same
//! connection. A small HTTP API on the same listener lists connected robots
//! and accepts commands for them.

pub mod api;
pub mod services;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use services::dispatch::{Dispatcher, LoggingResponses, ResponseHandler};
use services::store::{ArtifactStore, LocalArtifactStore};
use services::tracker::CommandTracker;
use ws::registry::ConnectionRegistry;

/// Shared application state available to all handlers.
pub struct AppState {
    pub config: fl_common::AppConfig,
    pub registry: ConnectionRegistry,
    pub tracker: Arc<CommandTracker>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    /// State with the log-only response handler and a local artifact store
    /// rooted at `storage.dir`.
    pub fn new(config: fl_common::AppConfig) -> Self {
        let store = Arc::new(LocalArtifactStore::new(config.storage.dir.clone()));
        Self::with_collaborators(config, Arc::new(LoggingResponses), store)
    }

    pub fn with_collaborators(
        config: fl_common::AppConfig,
        responses: Arc<dyn ResponseHandler>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let tracker = Arc::new(CommandTracker::new());
        Self {
            config,
            registry: ConnectionRegistry::new(),
            dispatcher: Dispatcher::new(responses, store, tracker.clone()),
            tracker,
        }
    }
}

/// `/api/*` for HTTP, everything else is an agent WebSocket path.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api::router(state.clone()))
        .merge(ws::router(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
