//! In-memory registry of live agent connections.
//!
//! Maps an agent identity to the sender half of its connection. The map is
//! the only state shared between sessions; every call is a single DashMap
//! operation and never waits on network I/O.

use std::fmt;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fl_protocol::{encode_envelope, ControlEnvelope, ProtocolError};
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Channel sender capable of pushing WS frames to a connected peer.
pub type WsSender = mpsc::UnboundedSender<Message>;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("robot '{0}' is not connected")]
    UnknownIdentity(String),

    #[error("connection to '{0}' is closed")]
    ConnectionClosed(String),

    #[error(transparent)]
    Encoding(#[from] ProtocolError),
}

/// Send capability for one connection.
///
/// Two handles are equal only if they came from the same connection, so a
/// session can tell its own registry entry apart from a newer one.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: WsSender,
}

impl ConnectionHandle {
    pub fn new(tx: WsSender) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a frame for the connection's writer task.
    pub fn send(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Registry entry for a connected agent.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
}

/// Snapshot of one entry, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedAgent {
    pub identity: String,
    pub connection_id: Uuid,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    /// identity → connection handle
    agents: DashMap<String, AgentConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
        }
    }

    /// Insert or replace the entry for `identity`.
    ///
    /// Returns the handle that was displaced, if any. Last writer wins.
    pub fn register(&self, identity: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let connection_id = handle.id();
        let previous = self.agents.insert(
            identity.to_string(),
            AgentConnection {
                handle,
                connected_at: Utc::now(),
            },
        );
        match &previous {
            Some(old) => tracing::warn!(
                %identity,
                %connection_id,
                displaced = %old.handle.id(),
                "Agent re-registered, replacing previous connection"
            ),
            None => tracing::info!(%identity, %connection_id, "Agent registered in connection registry"),
        }
        previous.map(|c| c.handle)
    }

    /// Remove the entry for `identity` only if it still belongs to `handle`.
    ///
    /// A superseded session calling this is a no-op, as is calling it twice.
    pub fn unregister(&self, identity: &str, handle: &ConnectionHandle) -> bool {
        let removed = self
            .agents
            .remove_if(identity, |_, conn| conn.handle == *handle)
            .is_some();
        if removed {
            tracing::info!(%identity, connection_id = %handle.id(), "Agent unregistered from connection registry");
        } else {
            tracing::debug!(%identity, connection_id = %handle.id(), "Unregister skipped, entry absent or superseded");
        }
        removed
    }

    pub fn resolve(&self, identity: &str) -> Option<ConnectionHandle> {
        self.agents.get(identity).map(|c| c.handle.clone())
    }

    pub fn send_text(&self, identity: &str, text: String) -> Result<(), RouteError> {
        let handle = self
            .resolve(identity)
            .ok_or_else(|| RouteError::UnknownIdentity(identity.to_string()))?;
        if handle.send(Message::Text(text.into())) {
            Ok(())
        } else {
            Err(RouteError::ConnectionClosed(identity.to_string()))
        }
    }

    pub fn send_envelope(&self, identity: &str, envelope: &ControlEnvelope) -> Result<(), RouteError> {
        let text = encode_envelope(envelope)?;
        self.send_text(identity, text)?;
        tracing::debug!(%identity, msgtype = %envelope.msgtype, "Envelope sent to agent");
        Ok(())
    }

    pub fn connected(&self) -> Vec<ConnectedAgent> {
        let mut agents: Vec<ConnectedAgent> = self
            .agents
            .iter()
            .map(|entry| ConnectedAgent {
                identity: entry.key().clone(),
                connection_id: entry.value().handle.id(),
                connected_at: entry.value().connected_at,
            })
            .collect();
        agents.sort_by(|a, b| a.identity.cmp(&b.identity));
        agents
    }

    pub fn online_agent_count(&self) -> usize {
        self.agents.len()
    }
}
