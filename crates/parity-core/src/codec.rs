//! Envelope framing: the three-way `req` / `resp` / `event` message shape.
//!
//! Encoding is strict (compact JSON produced from typed structs). Decoding is
//! lenient in the same places the gateway protocol is lenient: the `type` tag
//! is matched case-insensitively, ids may be strings or numbers, and request
//! params that are not an object collapse to an empty map.

use serde::Serialize;
use serde_json::{Map, Value};

/// Id used when an inbound request carries none.
pub const UNKNOWN_ID: &str = "unknown";

/// A decoded or to-be-encoded frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "req")]
    Request(Request),
    #[serde(rename = "resp")]
    Response(Response),
    #[serde(rename = "event")]
    Event(Event),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub params: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Response {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "event")]
    pub name: String,
    pub payload: Value,
}

/// Why an inbound frame could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame has no type tag")]
    MissingType,
    #[error("frame has unrecognised type {0:?}")]
    UnknownType(String),
}

impl Request {
    /// Build a request; `params` that is not an object becomes `{}`.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: into_object(params),
        }
    }

    /// Method name as dispatched: trimmed and lowercased.
    pub fn normalized_method(&self) -> String {
        self.method.trim().to_lowercase()
    }
}

impl Response {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

impl Envelope {
    /// Serialize to a compact JSON text frame.
    pub fn to_text(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Self::Response(resp) => Some(resp),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }
}

impl From<Request> for Envelope {
    fn from(value: Request) -> Self {
        Self::Request(value)
    }
}

impl From<Response> for Envelope {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

impl From<Event> for Envelope {
    fn from(value: Event) -> Self {
        Self::Event(value)
    }
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<Envelope, FrameError> {
    let Value::Object(frame) = serde_json::from_str::<Value>(text)? else {
        return Err(FrameError::NotAnObject);
    };

    let kind = frame
        .get("type")
        .and_then(Value::as_str)
        .map(|t| t.trim().to_lowercase())
        .unwrap_or_default();

    match kind.as_str() {
        "req" => Ok(Envelope::Request(Request {
            id: frame_id(&frame).unwrap_or_else(|| UNKNOWN_ID.to_string()),
            method: optional_str(&frame, "method").unwrap_or_default().to_string(),
            params: into_object(frame.get("params").cloned().unwrap_or(Value::Null)),
        })),
        "resp" => Ok(Envelope::Response(Response {
            id: frame_id(&frame).unwrap_or_else(|| UNKNOWN_ID.to_string()),
            ok: frame.get("ok").and_then(Value::as_bool) == Some(true),
            result: frame.get("result").cloned(),
            error: frame.get("error").map(decode_error_body),
        })),
        "event" => Ok(Envelope::Event(Event {
            name: optional_str(&frame, "event").unwrap_or("unknown").to_string(),
            payload: frame.get("payload").cloned().unwrap_or(Value::Null),
        })),
        "" => Err(FrameError::MissingType),
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

/// Normalise a JSON id (string or number) to its string form.
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Extract an optional string field from a JSON object.
pub fn optional_str<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str)
}

fn frame_id(frame: &Map<String, Value>) -> Option<String> {
    frame.get("id").and_then(id_string)
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn decode_error_body(value: &Value) -> ErrorBody {
    let code = value
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(500);
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    ErrorBody { code, message }
}
