//! Binary bulk-transfer frames.
//!
//! Layout on the wire, with no length prefix:
//!
//! ```text
//! "<kind>:<name>" 0x00 <context_a> 0x00 <context_b> 0x00 <body>
//! ```
//!
//! The header is split on its first colon only, so `kind` may not contain a
//! colon but `name` may. Exactly four segments are allowed, which means no
//! segment (the body included) can carry a NUL byte.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Value};

use crate::error::{ProtocolError, ProtocolResult};

const SEPARATOR: u8 = 0;
const SEGMENT_COUNT: usize = 4;

/// `kind` for map graph files: context_a = map id, context_b = floor id.
pub const GRAPH_DATA: &str = "graph_data";
/// `kind` for a parameter mapping: both contexts empty, body = UTF-8 JSON object.
pub const PARAM_DATA: &str = "param_data";

/// One decoded binary transfer unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFrame {
    pub kind: String,
    pub name: String,
    pub context_a: String,
    pub context_b: String,
    pub body: Bytes,
}

impl BulkFrame {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        context_a: impl Into<String>,
        context_b: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            context_a: context_a.into(),
            context_b: context_b.into(),
            body: body.into(),
        }
    }

    /// A map graph file tagged with its map and floor.
    pub fn graph(
        name: impl Into<String>,
        map_id: impl Into<String>,
        floor_id: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self::new(GRAPH_DATA, name, map_id, floor_id, body)
    }

    /// A parameter mapping serialized as a JSON object body.
    pub fn params(name: impl Into<String>, params: &Map<String, Value>) -> ProtocolResult<Self> {
        let body = serde_json::to_vec(params)
            .map_err(|e| ProtocolError::Encoding(format!("param body: {e}")))?;
        Ok(Self::new(PARAM_DATA, name, "", "", body))
    }

    pub fn is_params(&self) -> bool {
        self.kind == PARAM_DATA
    }

    /// Interpret the body of a `param_data` frame as a JSON object.
    pub fn param_body(&self) -> ProtocolResult<Map<String, Value>> {
        let text = std::str::from_utf8(&self.body)
            .map_err(|e| ProtocolError::shape(PARAM_DATA, format!("body is not UTF-8: {e}")))?;
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(map),
            other => Err(ProtocolError::shape(
                PARAM_DATA,
                format!("expected a JSON object, got {}", json_kind(&other)),
            )),
        }
    }

    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_bulk(
            &self.kind,
            &self.name,
            &self.context_a,
            &self.context_b,
            &self.body,
        )
    }
}

/// Build the wire bytes for a bulk frame.
pub fn encode_bulk(
    kind: &str,
    name: &str,
    context_a: &str,
    context_b: &str,
    body: &[u8],
) -> ProtocolResult<Vec<u8>> {
    if kind.contains(':') {
        return Err(ProtocolError::Encoding(format!(
            "kind '{kind}' must not contain ':'"
        )));
    }
    for (field, value) in [
        ("kind", kind.as_bytes()),
        ("name", name.as_bytes()),
        ("context_a", context_a.as_bytes()),
        ("context_b", context_b.as_bytes()),
        ("body", body),
    ] {
        if value.contains(&SEPARATOR) {
            return Err(ProtocolError::Encoding(format!(
                "{field} must not contain a NUL byte"
            )));
        }
    }

    let mut buf = BytesMut::with_capacity(
        kind.len() + name.len() + context_a.len() + context_b.len() + body.len() + 4,
    );
    buf.put_slice(kind.as_bytes());
    buf.put_u8(b':');
    buf.put_slice(name.as_bytes());
    buf.put_u8(SEPARATOR);
    buf.put_slice(context_a.as_bytes());
    buf.put_u8(SEPARATOR);
    buf.put_slice(context_b.as_bytes());
    buf.put_u8(SEPARATOR);
    buf.put_slice(body);
    Ok(buf.to_vec())
}

/// Split a binary message into its header, contexts and body.
///
/// The body is handed back untouched; only the three text segments are
/// checked for UTF-8.
pub fn decode_bulk(data: impl Into<Bytes>) -> ProtocolResult<BulkFrame> {
    let data: Bytes = data.into();

    let separators: Vec<usize> = data
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == SEPARATOR)
        .map(|(i, _)| i)
        .collect();
    if separators.len() != SEGMENT_COUNT - 1 {
        return Err(ProtocolError::MalformedFrame(format!(
            "expected {SEGMENT_COUNT} NUL-separated segments, got {}",
            separators.len() + 1
        )));
    }

    let header = segment_str(&data[..separators[0]], "header")?;
    let context_a = segment_str(&data[separators[0] + 1..separators[1]], "context_a")?;
    let context_b = segment_str(&data[separators[1] + 1..separators[2]], "context_b")?;
    let body = data.slice(separators[2] + 1..);

    let (kind, name) = header.split_once(':').ok_or_else(|| {
        ProtocolError::MalformedFrame(format!("header '{header}' has no ':' separator"))
    })?;

    Ok(BulkFrame {
        kind: kind.to_string(),
        name: name.to_string(),
        context_a: context_a.to_string(),
        context_b: context_b.to_string(),
        body,
    })
}

fn segment_str<'a>(raw: &'a [u8], segment: &str) -> ProtocolResult<&'a str> {
    std::str::from_utf8(raw)
        .map_err(|e| ProtocolError::MalformedFrame(format!("{segment} is not valid UTF-8: {e}")))
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
