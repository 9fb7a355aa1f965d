//! Coordinator-facing session: handshake, then commands until the
//! connection drops.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;

use fl_common::AgentConfig;
use fl_protocol::{
    encode_envelope, BulkFrame, Command, ControlEnvelope, InitialConnection, SERVER_IDENTITY,
    MAX_MESSAGE_SIZE,
};

use crate::dispatch::CommandDispatcher;

/// `type` of the PARAM envelope pushed during the handshake.
pub const INITIAL_PARAM: &str = "initial_param";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Connecting,
    Handshaking,
    Active,
    Closed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentState::Connecting => "CONNECTING",
            AgentState::Handshaking => "HANDSHAKING",
            AgentState::Active => "ACTIVE",
            AgentState::Closed => "CLOSED",
        })
    }
}

fn enter(state: AgentState) {
    tracing::info!(%state, "Agent session state");
}

// ─── Handshake ───────────────────────────────────────────────

/// Everything the agent sends, in order, right after connecting.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub initial: ControlEnvelope,
    pub artifacts: Vec<BulkFrame>,
    pub params: ControlEnvelope,
}

impl Handshake {
    pub fn new(
        sender: &str,
        initial: &InitialConnection,
        artifacts: Vec<BulkFrame>,
        params: Map<String, Value>,
    ) -> Self {
        Self {
            initial: ControlEnvelope::initial_connection(sender, initial),
            artifacts,
            params: ControlEnvelope::params(sender, SERVER_IDENTITY, INITIAL_PARAM, params),
        }
    }

    /// Build the handshake from config, reading artifact files now.
    ///
    /// An artifact that cannot be read is logged and left out.
    pub async fn load(config: &AgentConfig, sender: &str) -> Self {
        let initial = InitialConnection {
            map_id: config.initial.map_id.clone(),
            ip_address: config.initial.ip_address.clone(),
            building_number: config.initial.building_number,
            floor_level: config.initial.floor_level,
        };

        let mut artifacts = Vec::with_capacity(config.artifacts.len());
        for artifact in &config.artifacts {
            match tokio::fs::read(&artifact.path).await {
                Ok(body) => artifacts.push(BulkFrame::graph(
                    artifact.wire_name(),
                    artifact.map_id.clone(),
                    artifact.floor_id.clone(),
                    body,
                )),
                Err(e) => tracing::warn!(
                    path = %artifact.path.display(),
                    error = %e,
                    "Skipping unreadable artifact"
                ),
            }
        }

        Self::new(sender, &initial, artifacts, config.params.clone())
    }

    /// Wire frames in send order: announcement, artifacts, parameters.
    ///
    /// An artifact that cannot be framed is logged and left out; the rest of
    /// the handshake still goes out.
    pub fn frames(&self) -> anyhow::Result<Vec<Message>> {
        let mut frames = Vec::with_capacity(self.artifacts.len() + 2);
        frames.push(Message::Text(encode_envelope(&self.initial)?));
        for artifact in &self.artifacts {
            match artifact.encode() {
                Ok(bytes) => frames.push(Message::Binary(bytes)),
                Err(e) => tracing::warn!(
                    name = %artifact.name,
                    error = %e,
                    "Skipping artifact that cannot be framed"
                ),
            }
        }
        frames.push(Message::Text(encode_envelope(&self.params)?));
        Ok(frames)
    }
}

// ─── Session ─────────────────────────────────────────────────

/// Connect, replay the handshake and serve commands until the connection ends.
///
/// Returns `Ok(())` when the coordinator closed the connection, an error when
/// the transport failed in either direction.
pub async fn connect_and_run(
    server_url: &str,
    handshake: &Handshake,
    dispatcher: Arc<CommandDispatcher>,
) -> anyhow::Result<()> {
    enter(AgentState::Connecting);
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(MAX_MESSAGE_SIZE);
    let (ws_stream, _) = connect_async_with_config(server_url, Some(ws_config), false)
        .await
        .with_context(|| format!("Cannot connect to {server_url}"))?;
    tracing::info!(%server_url, "WebSocket connected to coordinator");

    let (mut ws_write, mut ws_read) = ws_stream.split();

    // Internal channel for writing to the WS from multiple tasks
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    // ── Writer task (drains tx channel → WS) ─────────────────

    let mut writer_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            ws_write.send(msg).await?;
        }
        Ok::<_, tokio_tungstenite::tungstenite::Error>(())
    });

    // ── Handshake ────────────────────────────────────────────

    enter(AgentState::Handshaking);
    let frames = handshake.frames()?;
    let frame_count = frames.len();
    for frame in frames {
        if tx.send(frame).is_err() {
            anyhow::bail!("Connection lost during handshake");
        }
    }
    tracing::info!(frames = frame_count, "Handshake sent");

    // ── Command worker ───────────────────────────────────────

    let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();
    let worker_handle = tokio::spawn(run_commands(dispatcher.clone(), command_rx, tx.clone()));

    // ── Reader loop ──────────────────────────────────────────

    enter(AgentState::Active);
    let outcome = loop {
        tokio::select! {
            msg = ws_read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(command) = dispatcher.decode(&text) {
                        let _ = command_tx.send(command);
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::warn!(bytes = data.len(), "Unexpected binary frame from coordinator, dropping");
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(reason = ?frame, "Coordinator closed connection");
                    break Ok(());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(anyhow::Error::from(e).context("WebSocket read failed")),
                None => break Ok(()),
            },
            written = &mut writer_handle => {
                break match written {
                    Ok(Ok(())) => Err(anyhow::anyhow!("Writer stopped")),
                    Ok(Err(e)) => Err(anyhow::Error::from(e).context("WebSocket send failed")),
                    Err(e) => Err(anyhow::Error::from(e).context("Writer task failed")),
                };
            }
        }
    };

    // Cleanup
    worker_handle.abort();
    writer_handle.abort();
    enter(AgentState::Closed);
    outcome
}

/// Execute commands one at a time, in arrival order.
async fn run_commands(
    dispatcher: Arc<CommandDispatcher>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::UnboundedSender<Message>,
) {
    while let Some(command) = commands.recv().await {
        let Some(response) = dispatcher.execute(command).await else {
            continue;
        };
        match encode_envelope(&response) {
            Ok(text) => {
                if tx.send(Message::Text(text)).is_err() {
                    break;
                }
                tracing::debug!(msgtype = %response.msgtype, "Response queued");
            }
            Err(e) => tracing::error!(error = %e, "Cannot encode response"),
        }
    }
}

// ─── Reconnect loop ──────────────────────────────────────────

/// Keep a session to the coordinator alive forever, replaying the handshake
/// on every reconnect.
pub async fn run(config: &AgentConfig, dispatcher: Arc<CommandDispatcher>) {
    let delay = Duration::from_secs(config.reconnect_delay_secs);
    loop {
        tracing::info!("Connecting to coordinator: {}", config.server_url);

        let handshake = Handshake::load(config, dispatcher.sender()).await;
        match connect_and_run(&config.server_url, &handshake, dispatcher.clone()).await {
            Ok(()) => {
                tracing::info!("Connection closed gracefully");
            }
            Err(e) => {
                tracing::error!("Connection error: {:#}", e);
            }
        }

        tracing::info!("Reconnecting in {} seconds...", delay.as_secs());
        tokio::time::sleep(delay).await;
    }
}
