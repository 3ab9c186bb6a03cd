//! Channel names and raw stream frames.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A data channel the engine knows how to decode.
///
/// Serialized with the Cortex stream name (`"com"`, `"dev"`, ...), so it can be
/// used directly in config files and subscribe payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    /// Mental commands: action + power (requires a loaded profile).
    #[serde(rename = "com")]
    MentalCommand,
    /// Device status: battery, signal, contact quality.
    #[serde(rename = "dev")]
    DeviceInfo,
    /// System/training events.
    #[serde(rename = "sys")]
    SystemEvent,
    /// Facial expressions: eye/face actions + power.
    #[serde(rename = "fac")]
    FacialExpression,
}

impl Channel {
    /// Every decodable channel.
    pub const ALL: [Channel; 4] = [
        Channel::MentalCommand,
        Channel::DeviceInfo,
        Channel::SystemEvent,
        Channel::FacialExpression,
    ];

    /// Returns the Cortex stream name for this channel.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::MentalCommand => "com",
            Channel::DeviceInfo => "dev",
            Channel::SystemEvent => "sys",
            Channel::FacialExpression => "fac",
        }
    }

    /// Look up a channel by its Cortex stream name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One data notification, flattened.
///
/// Cortex nests some columns (the contact-quality block of `dev`, for
/// example); `values` holds them inline in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamFrame {
    /// Session the frame belongs to.
    pub session_id: String,
    /// Channel the row was published on.
    pub channel: Channel,
    /// Timestamp (Unix seconds as f64, from Cortex).
    pub timestamp: f64,
    /// Row values with nested arrays expanded in place.
    pub values: Vec<Value>,
}

impl StreamFrame {
    /// Extract a frame from a notification object, if it carries a known channel.
    ///
    /// Notifications for channels the engine does not decode return `None`.
    #[must_use]
    pub fn from_notification(object: &serde_json::Map<String, Value>) -> Option<Self> {
        let session_id = object.get("sid")?.as_str()?.to_string();
        let timestamp = object.get("time").and_then(Value::as_f64).unwrap_or_default();

        Channel::ALL.into_iter().find_map(|channel| {
            let row = object.get(channel.as_str())?.as_array()?;
            let mut values = Vec::with_capacity(row.len());
            flatten_into(row, &mut values);
            Some(Self {
                session_id: session_id.clone(),
                channel,
                timestamp,
                values,
            })
        })
    }
}

fn flatten_into(row: &[Value], out: &mut Vec<Value>) {
    for value in row {
        match value {
            Value::Array(inner) => flatten_into(inner, out),
            other => out.push(other.clone()),
        }
    }
}
