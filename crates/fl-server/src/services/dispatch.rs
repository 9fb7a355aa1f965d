//! Coordinator-side demultiplexing of agent traffic.
//!
//! Binary frames are bulk artifacts, text frames are envelopes routed by
//! `msgtype`. Nothing here is fatal to a session: a frame that cannot be
//! decoded or has no handler is logged and dropped.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};

use fl_protocol::{decode_bulk, decode_envelope, InitialConnection, MsgType, Notification};

use super::store::ArtifactStore;
use super::tracker::CommandTracker;

/// Receiver for decoded responses and notifications.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn initial_connection(&self, identity: &str, info: &InitialConnection);

    async fn navigation_response(&self, identity: &str, command_id: Option<&str>, result: bool);

    /// Parameters reported by an agent, from a PARAM envelope or a
    /// `param_data` bulk frame (`kind` is the envelope `type` or the frame name).
    async fn params(&self, identity: &str, kind: Option<&str>, params: &Map<String, Value>);

    async fn message(&self, identity: &str, text: &str, error: bool);

    async fn rosbags(&self, identity: &str, names: &[String]);
}

/// Default handler: everything goes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingResponses;

#[async_trait]
impl ResponseHandler for LoggingResponses {
    async fn initial_connection(&self, identity: &str, info: &InitialConnection) {
        tracing::info!(
            %identity,
            map_id = %info.map_id,
            ip_address = %info.ip_address,
            building_number = info.building_number,
            floor_level = info.floor_level,
            "Initial connection announced"
        );
    }

    async fn navigation_response(&self, identity: &str, command_id: Option<&str>, result: bool) {
        tracing::info!(%identity, command_id = command_id.unwrap_or("-"), result, "Navigation response");
    }

    async fn params(&self, identity: &str, kind: Option<&str>, params: &Map<String, Value>) {
        tracing::info!(%identity, kind = kind.unwrap_or("-"), count = params.len(), "Parameters reported");
    }

    async fn message(&self, identity: &str, text: &str, error: bool) {
        if error {
            tracing::warn!(%identity, %text, "Agent reported an error");
        } else {
            tracing::info!(%identity, %text, "Agent message");
        }
    }

    async fn rosbags(&self, identity: &str, names: &[String]) {
        tracing::info!(%identity, count = names.len(), ?names, "Rosbag list received");
    }
}

/// What became of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Envelope handed to its response handler.
    Routed(MsgType),
    /// Bulk artifact written by the store.
    Stored(PathBuf),
    /// `param_data` bulk frame handed to the params handler.
    ParamsReceived,
    /// Well-formed envelope with a msgtype this side does not handle.
    Ignored { msgtype: String },
    /// Frame could not be decoded or processed.
    Dropped(String),
}

pub struct Dispatcher {
    responses: Arc<dyn ResponseHandler>,
    store: Arc<dyn ArtifactStore>,
    tracker: Arc<CommandTracker>,
}

impl Dispatcher {
    pub fn new(
        responses: Arc<dyn ResponseHandler>,
        store: Arc<dyn ArtifactStore>,
        tracker: Arc<CommandTracker>,
    ) -> Self {
        Self {
            responses,
            store,
            tracker,
        }
    }

    pub async fn dispatch_text(&self, identity: &str, text: &str) -> Outcome {
        let envelope = match decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(%identity, error = %e, "Dropping undecodable text frame");
                return Outcome::Dropped(e.to_string());
            }
        };

        let notification = match envelope.notification() {
            Ok(Some(notification)) => notification,
            Ok(None) => {
                tracing::warn!(%identity, msgtype = %envelope.msgtype, "Unknown msgtype, dropping");
                return Outcome::Ignored {
                    msgtype: envelope.msgtype,
                };
            }
            Err(e) => {
                tracing::warn!(%identity, error = %e, "Dropping envelope with mismatched payload");
                return Outcome::Dropped(e.to_string());
            }
        };

        let command_id = envelope.correlation_id();
        if let Some(command_id) = command_id {
            match self.tracker.complete(identity, command_id) {
                Some(elapsed) => tracing::info!(
                    %identity,
                    %command_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Response matched outstanding command"
                ),
                None => tracing::debug!(%identity, %command_id, "Response for untracked command"),
            }
        }

        let kind = match &notification {
            Notification::InitialConnection(info) => {
                self.responses.initial_connection(identity, info).await;
                MsgType::InitialConnection
            }
            Notification::NavigationResponse { result } => {
                self.responses
                    .navigation_response(identity, command_id, *result)
                    .await;
                MsgType::NavigationResponse
            }
            Notification::Param { kind, params } => {
                self.responses
                    .params(identity, kind.as_deref(), params)
                    .await;
                MsgType::Param
            }
            Notification::Message { text, error } => {
                self.responses.message(identity, text, *error).await;
                MsgType::Message
            }
            Notification::Rosbag { names } => {
                self.responses.rosbags(identity, names).await;
                MsgType::Rosbag
            }
        };
        Outcome::Routed(kind)
    }

    pub async fn dispatch_binary(&self, identity: &str, data: Bytes) -> Outcome {
        let frame = match decode_bulk(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%identity, error = %e, "Dropping malformed bulk frame");
                return Outcome::Dropped(e.to_string());
            }
        };

        tracing::info!(
            %identity,
            kind = %frame.kind,
            name = %frame.name,
            context_a = %frame.context_a,
            context_b = %frame.context_b,
            bytes = frame.body.len(),
            "Bulk frame received"
        );

        if frame.is_params() {
            return match frame.param_body() {
                Ok(params) => {
                    self.responses
                        .params(identity, Some(&frame.name), &params)
                        .await;
                    Outcome::ParamsReceived
                }
                Err(e) => {
                    tracing::warn!(%identity, error = %e, "Dropping param_data frame");
                    Outcome::Dropped(e.to_string())
                }
            };
        }

        match self.store.save(identity, &frame.name, &frame.body).await {
            Ok(path) => {
                tracing::info!(%identity, path = %path.display(), "Artifact saved");
                Outcome::Stored(path)
            }
            Err(e) => {
                tracing::error!(%identity, name = %frame.name, error = %e, "Failed to save artifact");
                Outcome::Dropped(e.to_string())
            }
        }
    }
}
