//! # fl-protocol
//!
//! Wire protocol shared by the fleetlink coordinator and its agents.
//!
//! One connection carries two sub-protocols, told apart by the transport's
//! frame type rather than by anything inside the payload:
//!
//! - text frames hold JSON [`ControlEnvelope`]s (and, towards agents, commands);
//! - binary frames hold NUL-delimited [`BulkFrame`]s for large artifacts.

pub mod bulk;
pub mod command;
pub mod envelope;
pub mod error;

pub use bulk::{decode_bulk, encode_bulk, BulkFrame, GRAPH_DATA, PARAM_DATA};
pub use command::{
    command_envelope, decode_command, Command, CommandKey, InboundCommand, NavigationCommand,
    NavigationGoal, ProcessCommand, RosbagCommand, VelocityCommand,
};
pub use envelope::{
    decode_envelope, encode_envelope, ControlEnvelope, InitialConnection, MsgType, Notification,
    SERVER_IDENTITY, UNCORRELATED_COMMAND_ID,
};
pub use error::{ProtocolError, ProtocolResult};

/// Largest frame either side accepts (64 MB, sized for map graphs).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Agent identity carried in a connection path: its last non-empty segment.
///
/// `/sample/robot1/` and `sample/robot1` both name `robot1`.
pub fn identity_from_path(path: &str) -> Option<&str> {
    path.split('/').filter(|s| !s.is_empty()).last()
}
