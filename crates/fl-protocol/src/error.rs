//! Error types for the fleetlink wire protocol.
//!
//! Per-frame failures (`MalformedFrame`, `Decode`, `PayloadShape`) are
//! recoverable: the receiver logs them and drops the single frame.

use thiserror::Error;

/// Convenient Result alias.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An outbound frame could not be built from the given fields.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A bulk frame violated the NUL-delimited segment layout.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A text frame was not valid structured data.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The payload does not have the shape its msgtype or command key requires.
    #[error("payload for '{msgtype}' has unexpected shape: {reason}")]
    PayloadShape { msgtype: String, reason: String },
}

impl ProtocolError {
    pub(crate) fn shape(msgtype: impl Into<String>, reason: impl ToString) -> Self {
        Self::PayloadShape {
            msgtype: msgtype.into(),
            reason: reason.to_string(),
        }
    }
}
