//! Agent-side command table.
//!
//! Commands are keyed by their top-level key, not by `msgtype`; this table
//! shares nothing with the coordinator's response table. Every handler is a
//! collaborator behind [`RobotHandler`]; this module only decides which one
//! runs and what, if anything, goes back to the coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use fl_protocol::{
    decode_command, Command, ControlEnvelope, InboundCommand, NavigationCommand, NavigationGoal,
    ProcessCommand, RosbagCommand, VelocityCommand,
};

/// Text reported back to the coordinator in a MESSAGE envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub error: bool,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: true,
        }
    }
}

/// The robot behind the agent.
#[async_trait]
pub trait RobotHandler: Send + Sync {
    /// Drive to the goal; `true` when it was reached.
    async fn navigate(&self, goal: &NavigationGoal) -> bool;

    async fn set_velocity(&self, velocity: &VelocityCommand);

    /// Apply parameters and return the mapping to echo back.
    async fn update_params(&self, params: Map<String, Value>) -> Map<String, Value>;

    async fn graph(&self, payload: &Map<String, Value>);

    async fn list_rosbags(&self) -> Vec<String>;

    /// Any rosbag request other than a listing.
    async fn rosbag(&self, command: &RosbagCommand);

    async fn pictures(&self, payload: &Map<String, Value>) -> Notice;

    async fn process(&self, command: &ProcessCommand) -> Notice;
}

pub struct CommandDispatcher {
    sender: String,
    handler: Arc<dyn RobotHandler>,
}

impl CommandDispatcher {
    /// `sender` is the name this agent puts on its responses.
    pub fn new(sender: impl Into<String>, handler: Arc<dyn RobotHandler>) -> Self {
        Self {
            sender: sender.into(),
            handler,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Decode one text frame; anything that is not a usable command is
    /// logged and yields `None`.
    pub fn decode(&self, text: &str) -> Option<Command> {
        match decode_command(text) {
            Ok(InboundCommand::Known(command)) => Some(command),
            Ok(InboundCommand::Unknown { keys }) => {
                tracing::warn!(?keys, "Unknown command received, dropping");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable command frame");
                None
            }
        }
    }

    /// Run one command to completion and build its response, if it has one.
    pub async fn execute(&self, command: Command) -> Option<ControlEnvelope> {
        let reply_to = command.reply_to().to_string();
        tracing::info!(command = %command.key(), %reply_to, "Executing command");

        match command {
            Command::Navigation(NavigationCommand::Goal(goal)) => {
                let result = self.handler.navigate(&goal).await;
                tracing::info!(command_id = %goal.command_id, result, "Navigation finished");
                Some(ControlEnvelope::navigation_response(
                    &self.sender,
                    reply_to,
                    goal.command_id,
                    result,
                ))
            }
            Command::Navigation(NavigationCommand::Other { msg_type }) => {
                tracing::debug!(%msg_type, "Ignoring navigation subtype");
                None
            }
            Command::CmdVel(velocity) => {
                self.handler.set_velocity(&velocity).await;
                None
            }
            Command::Param(params) => {
                let updated = self.handler.update_params(params).await;
                Some(ControlEnvelope::params(
                    &self.sender,
                    reply_to,
                    "updated_param",
                    updated,
                ))
            }
            Command::Graph(payload) => {
                self.handler.graph(&payload).await;
                None
            }
            Command::Rosbag(request) if request.wants_list() => {
                let names = self.handler.list_rosbags().await;
                Some(ControlEnvelope::rosbag_list(&self.sender, reply_to, names))
            }
            Command::Rosbag(request) => {
                self.handler.rosbag(&request).await;
                None
            }
            Command::Picture(payload) => {
                let notice = self.handler.pictures(&payload).await;
                Some(self.notice(reply_to, notice))
            }
            Command::Process(request) => {
                let notice = self.handler.process(&request).await;
                Some(self.notice(reply_to, notice))
            }
        }
    }

    fn notice(&self, reply_to: String, notice: Notice) -> ControlEnvelope {
        ControlEnvelope::message(&self.sender, reply_to, notice.text, notice.error)
    }
}
