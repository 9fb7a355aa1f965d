//! # fleetlink agent
//!
//! Runs next to a robot. Connects to the coordinator over WebSocket,
//! announces itself, pushes its map graphs and parameters, then executes
//! the commands it is sent and reports back.

pub mod connection;
pub mod dispatch;
pub mod robot;

pub use connection::{connect_and_run, run, AgentState, Handshake};
pub use dispatch::{CommandDispatcher, Notice, RobotHandler};
pub use robot::SimulatedRobot;

use anyhow::Context;
use fl_common::AgentConfig;

/// Identity this agent connects as: the last path segment of `server_url`.
pub fn agent_identity(server_url: &str) -> anyhow::Result<String> {
    let url = url::Url::parse(server_url)
        .with_context(|| format!("Invalid server URL '{server_url}'"))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => anyhow::bail!("Server URL must use ws:// or wss://, got '{other}://'"),
    }
    fl_protocol::identity_from_path(url.path())
        .map(str::to_string)
        .with_context(|| format!("Server URL '{server_url}' has no agent identity in its path"))
}

/// Name put in `sender` on everything this agent sends.
pub fn sender_name(config: &AgentConfig) -> anyhow::Result<String> {
    match &config.robot_name {
        Some(name) if !name.is_empty() => Ok(name.clone()),
        _ => agent_identity(&config.server_url),
    }
}
