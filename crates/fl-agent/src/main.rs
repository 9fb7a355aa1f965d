//! # fleetlink agent binary
//!
//! Configured through `FL_AGENT__*` environment variables (or `.env`) and an
//! optional TOML file named by `FL_AGENT_CONFIG`:
//!
//! ```sh
//! FL_AGENT__SERVER_URL=wss://coordinator:5000/sample/robot1/ fl-agent
//! FL_AGENT_CONFIG=/etc/fleetlink/agent.toml fl-agent
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use fl_agent::{CommandDispatcher, SimulatedRobot};
use fl_common::AgentConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AgentConfig::load().context("Failed to load agent configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("fleetlink agent v{} starting...", env!("CARGO_PKG_VERSION"));

    let identity = fl_agent::agent_identity(&config.server_url)?;
    let sender = fl_agent::sender_name(&config)?;
    tracing::info!(%identity, %sender, artifacts = config.artifacts.len(), "Agent configured");

    let robot = Arc::new(SimulatedRobot::new(
        config.rosbag_dir.clone(),
        config.params.clone(),
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(sender, robot));

    tokio::select! {
        _ = fl_agent::run(&config, dispatcher) => {}
        _ = shutdown_signal() => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    tracing::info!("Shutdown signal received");
}
