//! Agent-facing session controller.
//!
//! One task per connection. The identity comes from the last segment of the
//! upgrade path, the connection is registered before any frame is read, and
//! every exit path goes through the same cleanup.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use fl_common::{AppError, AppResult};
use fl_protocol::{identity_from_path, MAX_MESSAGE_SIZE};

use super::registry::ConnectionHandle;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Identified,
    Active,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Connecting => "CONNECTING",
            SessionState::Identified => "IDENTIFIED",
            SessionState::Active => "ACTIVE",
            SessionState::Closed => "CLOSED",
        })
    }
}

struct Session {
    identity: String,
    state: SessionState,
}

impl Session {
    fn new(identity: String) -> Self {
        tracing::info!(%identity, state = %SessionState::Connecting, "Agent session state");
        Self {
            identity,
            state: SessionState::Connecting,
        }
    }

    fn advance(&mut self, next: SessionState) {
        tracing::info!(
            identity = %self.identity,
            from = %self.state,
            state = %next,
            "Agent session state"
        );
        self.state = next;
    }
}

// ─── Upgrade handler ─────────────────────────────────────────

/// Agent WebSocket upgrade; `/sample/robot1/` connects as `robot1`.
pub async fn agent_ws_handler(
    ws: WebSocketUpgrade,
    Path(path): Path<String>,
    State(state): State<Arc<AppState>>,
) -> AppResult<Response> {
    let identity = identity_from_path(&path)
        .ok_or_else(|| AppError::BadRequest(format!("no agent identity in path '/{path}'")))?
        .to_string();

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .max_frame_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_agent_socket(socket, identity, state))
        .into_response())
}

// ─── Agent socket ────────────────────────────────────────────

/// Runs only once the upgrade succeeded, so every session that logs
/// CONNECTING also logs CLOSED.
async fn handle_agent_socket(socket: WebSocket, identity: String, state: Arc<AppState>) {
    let mut session = Session::new(identity);
    session.advance(SessionState::Identified);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // Forward channel → WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let identity = session.identity.clone();
    let handle = ConnectionHandle::new(tx);
    state.registry.register(&identity, handle.clone());
    session.advance(SessionState::Active);

    // Receive loop
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                state.dispatcher.dispatch_binary(&identity, data).await;
            }
            Ok(Message::Text(text)) => {
                state.dispatcher.dispatch_text(&identity, text.as_str()).await;
            }
            Ok(Message::Ping(data)) => {
                handle.send(Message::Pong(data));
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(%identity, reason = ?frame, "Agent WebSocket closed");
                break;
            }
            Err(e) => {
                tracing::warn!(%identity, error = %e, "Agent WebSocket error");
                break;
            }
            Ok(Message::Pong(_)) => {}
        }
    }

    // ── Cleanup ──────────────────────────────────────────────
    send_task.abort();
    if state.registry.unregister(&identity, &handle) {
        let dropped = state.tracker.discard(&identity);
        if dropped > 0 {
            tracing::info!(%identity, dropped, "Discarded outstanding commands");
        }
    }
    session.advance(SessionState::Closed);
}
