//! JSON-RPC request/response protocol structures and inbound classification.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::streams::StreamFrame;

/// A JSON-RPC 2.0 request to the Cortex API.
#[derive(Debug, Serialize)]
pub struct CortexRequest {
    pub id: u64,
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl CortexRequest {
    /// Create a new request with the given method and params.
    ///
    /// An empty params object is omitted from the wire form.
    pub fn new(id: u64, method: &'static str, params: Value) -> Self {
        let params = if params.as_object().is_some_and(serde_json::Map::is_empty) {
            None
        } else {
            Some(params)
        };

        Self {
            id,
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// A JSON-RPC 2.0 response from the Cortex API.
#[derive(Debug, Deserialize)]
pub struct CortexResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

/// A JSON-RPC 2.0 error payload from the Cortex API.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cortex API error {}: {}", self.code, self.message)
    }
}

/// A server-initiated `warning` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct Warning {
    pub code: i32,
    #[serde(default)]
    pub message: Value,
}

impl Warning {
    /// Session id carried by session-scoped warnings.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.message.get("sessionId").and_then(Value::as_str)
    }

    /// Headset id carried by headset-scoped warnings.
    #[must_use]
    pub fn headset_id(&self) -> Option<&str> {
        self.message.get("headsetId").and_then(Value::as_str)
    }

    /// Human-readable text, whether the message is a string or an object.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.message {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get("behavior")
                .or_else(|| map.get("message"))
                .and_then(Value::as_str)
                .map_or_else(|| self.message.to_string(), str::to_string),
            other => other.to_string(),
        }
    }
}

/// Everything that can arrive on the socket, sorted by how it is handled.
#[derive(Debug)]
pub enum Inbound {
    /// Reply to a request we sent.
    Response(CortexResponse),
    /// Unsolicited warning (session stop, headset connected, login, ...).
    Warning(Warning),
    /// Data row for a decodable channel.
    Stream(StreamFrame),
    /// Anything else, including rows for channels the engine does not decode.
    Unknown(Value),
}

impl Inbound {
    /// Classify one parsed inbound document.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        let Some(object) = value.as_object() else {
            return Inbound::Unknown(value);
        };

        if object.get("id").is_some_and(|id| !id.is_null())
            && (object.contains_key("result") || object.contains_key("error"))
        {
            return match serde_json::from_value::<CortexResponse>(value.clone()) {
                Ok(response) => Inbound::Response(response),
                Err(_) => Inbound::Unknown(value),
            };
        }

        if let Some(warning) = object.get("warning") {
            return match serde_json::from_value::<Warning>(warning.clone()) {
                Ok(warning) => Inbound::Warning(warning),
                Err(_) => Inbound::Unknown(value),
            };
        }

        if object.contains_key("sid") {
            if let Some(frame) = StreamFrame::from_notification(object) {
                return Inbound::Stream(frame);
            }
        }

        Inbound::Unknown(value)
    }
}
