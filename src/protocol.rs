//! JSON-RPC 2.0 wire shapes spoken by the aria2 daemon.
//!
//! # Message Format
//!
//! ```text
//! request       {"jsonrpc":"2.0","id":"1","method":"aria2.getVersion","params":[]}
//! response      {"id":"1","jsonrpc":"2.0","result":{...}}   or  "error":{code,message}
//! notification  {"jsonrpc":"2.0","method":"aria2.onDownloadStart","params":[{"gid":"..."}]}
//! ```
//!
//! Inbound frames are classified by [`classify`]: anything carrying a
//! `result` or `error` key is a response, otherwise a frame with a `method`
//! is a notification. Everything else is rejected.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, RpcError};

/// JSON-RPC protocol version sent with every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Outbound call request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id, unique among outstanding calls.
    pub id: String,
    /// Fully qualified method name (e.g. `aria2.addUri`).
    pub method: String,
    /// Positional parameters, token first when one is configured.
    pub params: Vec<Value>,
}

impl RpcRequest {
    /// Create a request with the given id, method and params.
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Numeric error code reported by aria2.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RemoteError {
    /// Build an error from whatever the daemon put in the `error` field.
    ///
    /// Well-formed objects are decoded as-is; a bare string becomes the
    /// message with code 0, and any other shape is kept verbatim in `data`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => match serde_json::from_value::<Self>(value.clone()) {
                Ok(err) => err,
                Err(_) => Self {
                    code: 0,
                    message: "malformed error object".to_string(),
                    data: Some(value),
                },
            },
            Value::String(message) => Self {
                code: 0,
                message,
                data: None,
            },
            other => Self {
                code: 0,
                message: other.to_string(),
                data: Some(other),
            },
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

/// Inbound response to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcResponse {
    /// Id of the request this answers. `None` when the daemon could not
    /// determine it (e.g. a parse error on its side).
    pub id: Option<String>,
    /// `result` on success, `error` on failure.
    pub outcome: std::result::Result<Value, RemoteError>,
}

impl RpcResponse {
    /// Successful response.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: Some(id.into()),
            outcome: Ok(result),
        }
    }

    /// Failed response.
    pub fn failure(id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            id: Some(id.into()),
            outcome: Err(error),
        }
    }

    /// Unwrap the result, turning an error object into [`RpcError::Remote`].
    pub fn into_result(self) -> Result<Value> {
        self.outcome.map_err(RpcError::Remote)
    }
}

/// Server-initiated event notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcNotification {
    /// Event type, e.g. `aria2.onDownloadComplete`.
    pub method: String,
    /// Event payload; aria2 sends `[{"gid": "..."}]`.
    #[serde(default)]
    pub params: Vec<Value>,
}

impl RpcNotification {
    /// Create a notification.
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// GID of the download this event refers to, if present.
    pub fn gid(&self) -> Option<&str> {
        self.params.first()?.get("gid")?.as_str()
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Answer to an outstanding call.
    Response(RpcResponse),
    /// Unsolicited event.
    Notification(RpcNotification),
}

/// Classify a raw inbound frame.
///
/// # Errors
///
/// Returns [`RpcError::ProtocolDecode`] when the bytes are not JSON, not an
/// object, or match neither the response nor the notification shape.
pub fn classify(frame: &[u8]) -> Result<Message> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|err| RpcError::ProtocolDecode(err.to_string()))?;
    let Value::Object(mut obj) = value else {
        return Err(RpcError::ProtocolDecode(
            "frame is not a JSON object".to_string(),
        ));
    };

    if obj.contains_key("result") || obj.contains_key("error") {
        return Ok(Message::Response(response_from_object(obj)));
    }

    match obj.remove("method") {
        Some(Value::String(method)) => {
            let params = match obj.remove("params") {
                Some(Value::Array(params)) => params,
                None | Some(Value::Null) => Vec::new(),
                Some(other) => vec![other],
            };
            Ok(Message::Notification(RpcNotification { method, params }))
        }
        Some(other) => Err(RpcError::ProtocolDecode(format!(
            "method is not a string: {other}"
        ))),
        None => Err(RpcError::ProtocolDecode(
            "frame has neither result, error nor method".to_string(),
        )),
    }
}

/// Decode a frame that must be a response (one-shot transports).
pub(crate) fn decode_response(frame: &[u8]) -> Result<RpcResponse> {
    match classify(frame)? {
        Message::Response(response) => Ok(response),
        Message::Notification(notification) => Err(RpcError::ProtocolDecode(format!(
            "expected a response, got notification {}",
            notification.method
        ))),
    }
}

fn response_from_object(mut obj: Map<String, Value>) -> RpcResponse {
    let id = obj.remove("id").and_then(|id| match id {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let outcome = match obj.remove("error") {
        Some(err) if !err.is_null() => Err(RemoteError::from_value(err)),
        _ => Ok(obj.remove("result").unwrap_or(Value::Null)),
    };
    RpcResponse { id, outcome }
}
