//! Outstanding-command bookkeeping.
//!
//! The dispatcher only carries `command_id` through; matching a response to
//! the command that caused it happens here.

use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct CommandTracker {
    /// (identity, command_id) → when the command was sent
    pending: DashMap<(String, String), Instant>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, identity: &str, command_id: &str) {
        self.pending
            .insert((identity.to_string(), command_id.to_string()), Instant::now());
    }

    /// Close out a command; returns how long the agent took, or `None` if
    /// nothing was waiting on this id.
    pub fn complete(&self, identity: &str, command_id: &str) -> Option<Duration> {
        self.pending
            .remove(&(identity.to_string(), command_id.to_string()))
            .map(|(_, sent_at)| sent_at.elapsed())
    }

    pub fn outstanding(&self, identity: &str) -> usize {
        self.pending
            .iter()
            .filter(|entry| entry.key().0 == identity)
            .count()
    }

    /// Drop everything pending for a disconnected agent.
    pub fn discard(&self, identity: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(id, _), _| id != identity);
        before.saturating_sub(self.pending.len())
    }
}
