//! Commands sent from the coordinator to an agent.
//!
//! An agent demultiplexes inbound text frames by command key
//! (`navigation`, `cmd_vel`, ...). Two framings are understood:
//!
//! - an envelope whose `msgtype` is the command key and whose `msg` (or,
//!   when `msg` is absent, remaining top-level fields) is the payload;
//! - a bare object keyed by the command key, `{"cmd_vel": {...}}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bulk::json_kind;
use crate::envelope::{required_id, unwrap_message, ControlEnvelope, SERVER_IDENTITY};
use crate::error::{ProtocolError, ProtocolResult};

/// Navigation subtype that carries a goal pose.
pub const NAVIGATION_GOAL: &str = "NAVIGATION";

/// Rosbag subtype that asks for the list of recorded bags.
pub const GET_ROSBAGS: &str = "get_rosbags";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKey {
    Navigation,
    CmdVel,
    Param,
    Graph,
    Rosbag,
    Picture,
    Process,
}

impl CommandKey {
    /// Lookup order for bare command objects.
    pub const ALL: [CommandKey; 7] = [
        CommandKey::Navigation,
        CommandKey::CmdVel,
        CommandKey::Param,
        CommandKey::Graph,
        CommandKey::Rosbag,
        CommandKey::Picture,
        CommandKey::Process,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKey::Navigation => "navigation",
            CommandKey::CmdVel => "cmd_vel",
            CommandKey::Param => "param",
            CommandKey::Graph => "graph",
            CommandKey::Rosbag => "rosbag",
            CommandKey::Picture => "picture",
            CommandKey::Process => "process",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }
}

impl std::fmt::Display for CommandKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A goal pose to drive to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationGoal {
    pub x: f64,
    pub y: f64,
    pub th: f64,
    pub sender: String,
    #[serde(deserialize_with = "required_id")]
    pub command_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NavigationCommand {
    Goal(NavigationGoal),
    /// A navigation subtype this agent does not act on.
    Other { msg_type: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub linear_x: f64,
    pub linear_y: f64,
    pub angular_z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosbagCommand {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RosbagCommand {
    pub fn wants_list(&self) -> bool {
        self.kind == GET_ROSBAGS
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessCommand {
    /// Unit/action handed to the process-control collaborator.
    pub systemctl: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A decoded command, one variant per command key.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Navigation(NavigationCommand),
    CmdVel(VelocityCommand),
    Param(Map<String, Value>),
    Graph(Map<String, Value>),
    Rosbag(RosbagCommand),
    Picture(Map<String, Value>),
    Process(ProcessCommand),
}

impl Command {
    /// Build the typed command for `key` from its payload.
    pub fn from_payload(key: CommandKey, payload: Value) -> ProtocolResult<Self> {
        let map = match payload {
            Value::Object(map) => map,
            other => {
                return Err(ProtocolError::shape(
                    key.as_str(),
                    format!("payload must be an object, got {}", json_kind(&other)),
                ))
            }
        };

        let command = match key {
            CommandKey::Navigation => {
                let msg_type = map
                    .get("msg_type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProtocolError::shape(key.as_str(), "missing string msg_type"))?
                    .to_string();
                if msg_type == NAVIGATION_GOAL {
                    Command::Navigation(NavigationCommand::Goal(typed(key, map)?))
                } else {
                    Command::Navigation(NavigationCommand::Other { msg_type })
                }
            }
            CommandKey::CmdVel => Command::CmdVel(typed(key, map)?),
            CommandKey::Param => Command::Param(map),
            CommandKey::Graph => Command::Graph(map),
            CommandKey::Rosbag => Command::Rosbag(typed(key, map)?),
            CommandKey::Picture => Command::Picture(map),
            CommandKey::Process => Command::Process(typed(key, map)?),
        };
        Ok(command)
    }

    pub fn key(&self) -> CommandKey {
        match self {
            Command::Navigation(_) => CommandKey::Navigation,
            Command::CmdVel(_) => CommandKey::CmdVel,
            Command::Param(_) => CommandKey::Param,
            Command::Graph(_) => CommandKey::Graph,
            Command::Rosbag(_) => CommandKey::Rosbag,
            Command::Picture(_) => CommandKey::Picture,
            Command::Process(_) => CommandKey::Process,
        }
    }

    /// Whether the agent answers with the command's own `command_id`.
    ///
    /// Only navigation goals do; every other response is sent as `"0"`.
    pub fn correlates_response(&self) -> bool {
        matches!(self, Command::Navigation(NavigationCommand::Goal(_)))
    }

    /// Where a response to this command is addressed.
    pub fn reply_to(&self) -> &str {
        let sender = match self {
            Command::Navigation(NavigationCommand::Goal(goal)) => Some(goal.sender.as_str()),
            Command::Navigation(NavigationCommand::Other { .. }) | Command::CmdVel(_) => None,
            Command::Param(map) | Command::Graph(map) | Command::Picture(map) => {
                map.get("sender").and_then(Value::as_str)
            }
            Command::Rosbag(cmd) => cmd.sender.as_deref(),
            Command::Process(cmd) => cmd.sender.as_deref(),
        };
        sender.unwrap_or(SERVER_IDENTITY)
    }
}

fn typed<T: DeserializeOwned>(key: CommandKey, map: Map<String, Value>) -> ProtocolResult<T> {
    serde_json::from_value(Value::Object(map)).map_err(|e| ProtocolError::shape(key.as_str(), e))
}

/// Result of reading an inbound command frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundCommand {
    Known(Command),
    /// No recognised command key; carries what was found instead.
    Unknown { keys: Vec<String> },
}

/// Decode a text frame received by an agent.
pub fn decode_command(text: &str) -> ProtocolResult<InboundCommand> {
    let value = unwrap_message(serde_json::from_str(text)?);

    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(ProtocolError::shape(
                "command",
                format!("frame must be an object, got {}", json_kind(&other)),
            ))
        }
    };

    if map.contains_key("msgtype") {
        let envelope: ControlEnvelope = serde_json::from_value(Value::Object(map))?;
        let Some(key) = CommandKey::parse(&envelope.msgtype) else {
            return Ok(InboundCommand::Unknown {
                keys: vec![envelope.msgtype],
            });
        };
        let payload = envelope_payload(key, envelope)?;
        return Command::from_payload(key, payload).map(InboundCommand::Known);
    }

    match CommandKey::ALL.into_iter().find(|k| map.contains_key(k.as_str())) {
        Some(key) => {
            let payload = map.remove(key.as_str()).unwrap_or(Value::Null);
            Command::from_payload(key, payload).map(InboundCommand::Known)
        }
        None => Ok(InboundCommand::Unknown {
            keys: map.keys().cloned().collect(),
        }),
    }
}

/// Pull the command payload out of an envelope, filling in the envelope's
/// `sender` and `command_id` where the payload lacks them.
fn envelope_payload(key: CommandKey, envelope: ControlEnvelope) -> ProtocolResult<Value> {
    let mut payload = match envelope.msg {
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(ProtocolError::shape(
                key.as_str(),
                format!("msg must be an object, got {}", json_kind(&other)),
            ))
        }
        None => envelope.extra,
    };
    payload
        .entry("sender")
        .or_insert_with(|| Value::String(envelope.sender));
    if let Some(command_id) = envelope.command_id {
        payload
            .entry("command_id")
            .or_insert_with(|| Value::String(command_id));
    }
    Ok(Value::Object(payload))
}

/// Wrap a command payload in an envelope addressed to `destination`.
pub fn command_envelope(
    key: CommandKey,
    destination: impl Into<String>,
    command_id: impl Into<String>,
    payload: Map<String, Value>,
) -> ControlEnvelope {
    ControlEnvelope::new(SERVER_IDENTITY, key.as_str())
        .to(destination)
        .with_command_id(command_id)
        .with_msg(Value::Object(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::encode_envelope;
    use serde_json::json;

    fn known(text: &str) -> Command {
        match decode_command(text).unwrap() {
            InboundCommand::Known(cmd) => cmd,
            other => panic!("expected a known command, got {other:?}"),
        }
    }

    #[test]
    fn flat_navigation_envelope() {
        let cmd = known(
            r#"{"msgtype":"navigation","x":1.0,"y":2.0,"th":0.0,
                "sender":"server","command_id":"42","msg_type":"NAVIGATION"}"#,
        );
        assert_eq!(
            cmd,
            Command::Navigation(NavigationCommand::Goal(NavigationGoal {
                x: 1.0,
                y: 2.0,
                th: 0.0,
                sender: "server".into(),
                command_id: "42".into(),
            }))
        );
        assert_eq!(cmd.reply_to(), "server");
    }

    #[test]
    fn wrapped_envelope_carries_id_into_payload() {
        let envelope = command_envelope(
            CommandKey::Navigation,
            "robot1",
            "abc",
            json!({"msg_type": "NAVIGATION", "x": 3, "y": 4, "th": 1.5})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let cmd = known(&encode_envelope(&envelope).unwrap());
        match cmd {
            Command::Navigation(NavigationCommand::Goal(goal)) => {
                assert_eq!(goal.command_id, "abc");
                assert_eq!(goal.sender, "server");
                assert_eq!(goal.x, 3.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bare_keyed_commands() {
        assert_eq!(
            known(r#"{"cmd_vel":{"linear_x":0.5,"linear_y":0.0,"angular_z":-0.1}}"#),
            Command::CmdVel(VelocityCommand {
                linear_x: 0.5,
                linear_y: 0.0,
                angular_z: -0.1
            })
        );

        let cmd = known(r#"{"process":{"systemctl":"restart nav","sender":"ops"}}"#);
        assert_eq!(cmd.key(), CommandKey::Process);
        assert_eq!(cmd.reply_to(), "ops");
    }

    #[test]
    fn other_navigation_subtypes_are_not_goals() {
        let cmd = known(r#"{"navigation":{"msg_type":"CANCEL"}}"#);
        assert_eq!(
            cmd,
            Command::Navigation(NavigationCommand::Other {
                msg_type: "CANCEL".into()
            })
        );
    }

    #[test]
    fn navigation_goal_needs_its_fields() {
        let err = decode_command(r#"{"navigation":{"msg_type":"NAVIGATION","x":1}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadShape { .. }));
    }

    #[test]
    fn rosbag_subtypes() {
        let cmd = known(r#"{"rosbag":{"type":"get_rosbags","sender":"server"}}"#);
        let Command::Rosbag(rosbag) = cmd else {
            panic!("expected rosbag");
        };
        assert!(rosbag.wants_list());

        let cmd = known(r#"{"rosbag":{"type":"record","topic":"/scan"}}"#);
        let Command::Rosbag(rosbag) = cmd else {
            panic!("expected rosbag");
        };
        assert!(!rosbag.wants_list());
        assert_eq!(rosbag.extra["topic"], "/scan");
    }

    #[test]
    fn unknown_keys_are_reported() {
        assert_eq!(
            decode_command(r#"{"teleport":{}}"#).unwrap(),
            InboundCommand::Unknown {
                keys: vec!["teleport".into()]
            }
        );
        assert_eq!(
            decode_command(r#"{"message":{"sender":"server","msgtype":"dance"}}"#).unwrap(),
            InboundCommand::Unknown {
                keys: vec!["dance".into()]
            }
        );
    }

    #[test]
    fn non_object_payload_is_a_shape_error() {
        assert!(matches!(
            decode_command(r#"{"param":[1,2,3]}"#).unwrap_err(),
            ProtocolError::PayloadShape { .. }
        ));
        assert!(matches!(
            decode_command("[1]").unwrap_err(),
            ProtocolError::PayloadShape { .. }
        ));
    }
}
