//! # fl-common
//!
//! Shared configuration and error types for the fleetlink coordinator and agent.

pub mod config;
pub mod error;

pub use config::{AgentConfig, AppConfig};
pub use error::{AppError, AppResult};
