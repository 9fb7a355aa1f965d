//! Outbound commands to connected agents.

use serde_json::{Map, Value};
use uuid::Uuid;

use fl_common::AppError;
use fl_protocol::{
    command_envelope, Command, CommandKey, ProtocolError, SERVER_IDENTITY,
    UNCORRELATED_COMMAND_ID,
};

use super::tracker::CommandTracker;
use crate::ws::registry::{ConnectionRegistry, RouteError};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error(transparent)]
    Invalid(#[from] ProtocolError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

impl From<CommandError> for AppError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Route(RouteError::UnknownIdentity(_) | RouteError::ConnectionClosed(_)) => {
                AppError::NotFound(err.to_string())
            }
            CommandError::Route(RouteError::Encoding(e)) => AppError::Internal(e.into()),
            CommandError::UnknownCommand(_) | CommandError::Invalid(_) => {
                AppError::BadRequest(err.to_string())
            }
        }
    }
}

/// Send `command` with `payload` to the agent registered as `identity`.
///
/// The payload gets `sender = "server"` and the command id unless it already
/// carries them, and must decode as the command it claims to be. Commands the
/// agent answers with the same id are recorded with `tracker`.
///
/// Returns the command id used.
pub fn send_command(
    registry: &ConnectionRegistry,
    tracker: &CommandTracker,
    identity: &str,
    command: &str,
    mut payload: Map<String, Value>,
    command_id: Option<String>,
) -> Result<String, CommandError> {
    let key =
        CommandKey::parse(command).ok_or_else(|| CommandError::UnknownCommand(command.to_string()))?;

    let command_id = command_id
        .or_else(|| payload.get("command_id").and_then(id_string))
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    payload
        .entry("sender")
        .or_insert_with(|| Value::String(SERVER_IDENTITY.to_string()));
    payload.insert("command_id".into(), Value::String(command_id.clone()));

    let typed = Command::from_payload(key, Value::Object(payload.clone()))?;
    let tracked = typed.correlates_response() && command_id != UNCORRELATED_COMMAND_ID;

    // Track before sending; the response can beat the return of `send_envelope`.
    if tracked {
        tracker.track(identity, &command_id);
    }
    let envelope = command_envelope(key, identity, command_id.clone(), payload);
    if let Err(e) = registry.send_envelope(identity, &envelope) {
        if tracked {
            tracker.complete(identity, &command_id);
        }
        tracing::warn!(%identity, command = %key, error = %e, "Command not delivered");
        return Err(e.into());
    }

    tracing::info!(%identity, command = %key, %command_id, tracked, "Command sent to agent");
    Ok(command_id)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
