//! Coordinator services: frame dispatch, outbound commands and their collaborators.

pub mod commands;
pub mod dispatch;
pub mod store;
pub mod tracker;
