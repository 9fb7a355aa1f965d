//! Robot API: who is connected, and sending them commands.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::services::commands::send_command;
use crate::AppState;
use fl_common::{AppError, AppResult};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(list_robots))
        .route("/{identity}/commands", post(post_command))
        .with_state(state)
}

// ─── Types ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RobotResponse {
    identity: String,
    connection_id: Uuid,
    connected_at: DateTime<Utc>,
    outstanding_commands: usize,
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    command: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    command_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommandAccepted {
    command_id: String,
}

// ─── Handlers ────────────────────────────────────────────────

async fn list_robots(State(state): State<Arc<AppState>>) -> Json<Vec<RobotResponse>> {
    let robots = state
        .registry
        .connected()
        .into_iter()
        .map(|agent| RobotResponse {
            outstanding_commands: state.tracker.outstanding(&agent.identity),
            identity: agent.identity,
            connection_id: agent.connection_id,
            connected_at: agent.connected_at,
        })
        .collect();
    Json(robots)
}

async fn post_command(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
    Json(req): Json<CommandRequest>,
) -> AppResult<(StatusCode, Json<CommandAccepted>)> {
    let payload = match req.payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err(AppError::BadRequest("payload must be a JSON object".into())),
    };

    let command_id = send_command(
        &state.registry,
        &state.tracker,
        &identity,
        &req.command,
        payload,
        req.command_id,
    )?;

    Ok((StatusCode::ACCEPTED, Json(CommandAccepted { command_id })))
}
