//! Structured control messages carried in text frames.
//!
//! On the wire an envelope travels as `{"message": <envelope>}`. Decoding also
//! accepts a bare envelope object so that peers which predate the wrapper keep
//! working.

use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::bulk::json_kind;
use crate::error::{ProtocolError, ProtocolResult};

/// Identity used by the coordinator in `sender` / `destination`.
pub const SERVER_IDENTITY: &str = "server";

/// `command_id` used by responses that answer no particular request.
pub const UNCORRELATED_COMMAND_ID: &str = "0";

/// Key wrapping every envelope in a text frame.
pub const WRAPPER_KEY: &str = "message";

/// Response and notification kinds understood by the coordinator.
///
/// `msgtype` itself stays an open string on [`ControlEnvelope`]; this enum
/// only names the kinds with a known payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    InitialConnection,
    NavigationResponse,
    Param,
    Rosbag,
    Message,
}

impl MsgType {
    pub const ALL: [MsgType; 5] = [
        MsgType::InitialConnection,
        MsgType::NavigationResponse,
        MsgType::Param,
        MsgType::Rosbag,
        MsgType::Message,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            // Spelling is part of the wire format.
            MsgType::InitialConnection => "INNITIAL_CONNECTION",
            MsgType::NavigationResponse => "NAVIGATION_RESPONSE",
            MsgType::Param => "PARAM",
            MsgType::Rosbag => "ROSBAG",
            MsgType::Message => "MESSAGE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl std::fmt::Display for MsgType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured control message.
///
/// Fields the model does not name are kept in `extra` and written back
/// verbatim, so responses can echo whatever the peer attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub sender: String,
    #[serde(default)]
    pub timestamp: String,
    pub msgtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub command_id: Option<String>,
    /// `None` and `Some(Value::Null)` are the same on the wire: neither is
    /// written, and a `"msg": null` reads back as `None`.
    #[serde(default, skip_serializing_if = "msg_is_absent")]
    pub msg: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ControlEnvelope {
    /// New envelope stamped with the current UTC time.
    pub fn new(sender: impl Into<String>, msgtype: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            msgtype: msgtype.into(),
            destination: None,
            command_id: None,
            msg: None,
            extra: Map::new(),
        }
    }

    pub fn to(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_command_id(mut self, command_id: impl Into<String>) -> Self {
        self.command_id = Some(command_id.into());
        self
    }

    pub fn with_msg(mut self, msg: impl Into<Value>) -> Self {
        self.msg = Some(msg.into()).filter(|msg| !msg.is_null());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> Option<MsgType> {
        MsgType::parse(&self.msgtype)
    }

    /// The `command_id` this envelope answers, if it answers one.
    ///
    /// Absent ids and the literal `"0"` both mean "no outstanding request".
    pub fn correlation_id(&self) -> Option<&str> {
        self.command_id
            .as_deref()
            .filter(|id| !id.is_empty() && *id != UNCORRELATED_COMMAND_ID)
    }

    // ─── Outbound constructors ───────────────────────────────

    pub fn initial_connection(sender: impl Into<String>, info: &InitialConnection) -> Self {
        Self::new(sender, MsgType::InitialConnection.as_str())
            .to(SERVER_IDENTITY)
            .with_field("map_id", info.map_id.clone())
            .with_field("ip_address", info.ip_address.clone())
            .with_field("building_number", info.building_number)
            .with_field("floor_level", info.floor_level)
    }

    pub fn navigation_response(
        sender: impl Into<String>,
        destination: impl Into<String>,
        command_id: impl Into<String>,
        result: bool,
    ) -> Self {
        Self::new(sender, MsgType::NavigationResponse.as_str())
            .to(destination)
            .with_command_id(command_id)
            .with_field("result", result)
    }

    /// A PARAM envelope; `kind` lands in the `type` field
    /// (`"updated_param"` for echoes, `"initial_param"` for the handshake push).
    pub fn params(
        sender: impl Into<String>,
        destination: impl Into<String>,
        kind: &str,
        params: Map<String, Value>,
    ) -> Self {
        Self::new(sender, MsgType::Param.as_str())
            .to(destination)
            .with_command_id(UNCORRELATED_COMMAND_ID)
            .with_field("type", kind)
            .with_msg(Value::Object(params))
    }

    pub fn rosbag_list(
        sender: impl Into<String>,
        destination: impl Into<String>,
        names: Vec<String>,
    ) -> Self {
        Self::new(sender, MsgType::Rosbag.as_str())
            .to(destination)
            .with_command_id(UNCORRELATED_COMMAND_ID)
            .with_field("type", "rosbag_name_list")
            .with_msg(names)
    }

    pub fn message(
        sender: impl Into<String>,
        destination: impl Into<String>,
        text: impl Into<String>,
        error: bool,
    ) -> Self {
        Self::new(sender, MsgType::Message.as_str())
            .to(destination)
            .with_command_id(UNCORRELATED_COMMAND_ID)
            .with_msg(Value::String(text.into()))
            .with_field("error", error)
    }

    // ─── Typed payload access ────────────────────────────────

    /// Decode the payload according to `msgtype`.
    ///
    /// Returns `Ok(None)` for a msgtype with no known shape; the caller
    /// decides whether that is worth more than a log line.
    pub fn notification(&self) -> ProtocolResult<Option<Notification>> {
        let Some(kind) = self.kind() else {
            return Ok(None);
        };

        let notification = match kind {
            MsgType::InitialConnection => Notification::InitialConnection(self.fields()?),
            MsgType::NavigationResponse => {
                let NavigationResult { result } = self.fields()?;
                Notification::NavigationResponse { result }
            }
            MsgType::Param => Notification::Param {
                kind: self.extra_str("type"),
                params: self.msg_object()?,
            },
            MsgType::Message => {
                let text = match self.msg.as_ref() {
                    Some(Value::String(s)) => s.clone(),
                    other => return Err(self.msg_mismatch("a string", other)),
                };
                let MessageFlags { error } = self.fields()?;
                Notification::Message { text, error }
            }
            MsgType::Rosbag => Notification::Rosbag {
                names: self.msg_string_list()?,
            },
        };
        Ok(Some(notification))
    }

    fn fields<T: DeserializeOwned>(&self) -> ProtocolResult<T> {
        serde_json::from_value(Value::Object(self.extra.clone()))
            .map_err(|e| ProtocolError::shape(&self.msgtype, e))
    }

    fn extra_str(&self, key: &str) -> Option<String> {
        self.extra
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn msg_object(&self) -> ProtocolResult<Map<String, Value>> {
        match self.msg.as_ref() {
            Some(Value::Object(map)) => Ok(map.clone()),
            other => Err(self.msg_mismatch("an object", other)),
        }
    }

    fn msg_string_list(&self) -> ProtocolResult<Vec<String>> {
        match self.msg.as_ref() {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        ProtocolError::shape(
                            &self.msgtype,
                            format!("list item is {}, expected string", json_kind(item)),
                        )
                    })
                })
                .collect(),
            other => Err(self.msg_mismatch("a list of strings", other)),
        }
    }

    fn msg_mismatch(&self, expected: &str, got: Option<&Value>) -> ProtocolError {
        let got = got.map(json_kind).unwrap_or("nothing");
        ProtocolError::shape(&self.msgtype, format!("msg must be {expected}, got {got}"))
    }
}

/// Decoded payload of a response or notification envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    InitialConnection(InitialConnection),
    NavigationResponse {
        result: bool,
    },
    Param {
        kind: Option<String>,
        params: Map<String, Value>,
    },
    Message {
        text: String,
        error: bool,
    },
    Rosbag {
        names: Vec<String>,
    },
}

/// Fields an agent announces when it first connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialConnection {
    pub map_id: String,
    pub ip_address: String,
    pub building_number: i64,
    pub floor_level: i64,
}

#[derive(Deserialize)]
struct NavigationResult {
    result: bool,
}

#[derive(Deserialize)]
struct MessageFlags {
    #[serde(default)]
    error: bool,
}

// ─── Text codec ──────────────────────────────────────────────

#[derive(Serialize)]
struct Wrapped<'a> {
    message: &'a ControlEnvelope,
}

/// Serialize an envelope into its wrapped text-frame form.
pub fn encode_envelope(envelope: &ControlEnvelope) -> ProtocolResult<String> {
    serde_json::to_string(&Wrapped { message: envelope })
        .map_err(|e| ProtocolError::Encoding(e.to_string()))
}

/// Parse a text frame into an envelope, unwrapping `{"message": ...}` if present.
pub fn decode_envelope(text: &str) -> ProtocolResult<ControlEnvelope> {
    let value: Value = serde_json::from_str(text)?;
    Ok(serde_json::from_value(unwrap_message(value))?)
}

/// Strip the `{"message": ...}` wrapper from a parsed text frame.
///
/// A top-level `msgtype` means the object already is a bare envelope.
pub(crate) fn unwrap_message(value: Value) -> Value {
    match value {
        Value::Object(mut map) if !map.contains_key("msgtype") => match map.remove(WRAPPER_KEY) {
            Some(inner @ Value::Object(_)) => inner,
            Some(other) => {
                map.insert(WRAPPER_KEY.to_string(), other);
                Value::Object(map)
            }
            None => Value::Object(map),
        },
        other => other,
    }
}

fn msg_is_absent(msg: &Option<Value>) -> bool {
    matches!(msg, None | Some(Value::Null))
}

/// Accept `"42"` as well as `42` for correlation ids.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "command_id must be a string or number, got {}",
            json_kind(&other)
        ))),
    }
}

/// Same as `string_or_number`, for ids that must be present.
pub(crate) fn required_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    string_or_number(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("command_id must not be null"))
}
