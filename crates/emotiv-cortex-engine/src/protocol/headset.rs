//! `queryHeadsets` and `controlDevice` payloads.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

/// One entry of `queryHeadsets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadsetInfo {
    pub id: String,
    /// `discovered`, `connecting` or `connected`.
    pub status: String,
    /// Link type as reported by the service, e.g. `dongle` or `usb cable`.
    pub connected_by: Option<String>,
    #[serde(rename = "dongle")]
    pub dongle_serial: Option<String>,
    pub firmware: Option<String>,
    pub motion_sensors: Option<Vec<String>>,
    pub sensors: Option<Vec<String>>,
    pub settings: Option<Value>,
    pub mode: Option<String>,
    pub custom_name: Option<String>,
    /// Fields the engine does not model.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// `command` of a `controlDevice` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Connect,
    Disconnect,
    Refresh,
}

impl DeviceCommand {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceCommand::Connect => "connect",
            DeviceCommand::Disconnect => "disconnect",
            DeviceCommand::Refresh => "refresh",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connected_insight() {
        let info: HeadsetInfo = serde_json::from_value(json!({
            "id": "INSIGHT-5A1B2C3D",
            "status": "connected",
            "connectedBy": "bluetooth",
            "firmware": "930",
            "customName": "lab insight",
            "motionSensors": ["Q0", "Q1", "Q2", "Q3"],
            "sensors": ["AF3", "T7", "Pz", "T8", "AF4"],
            "virtualHeadsetId": ""
        }))
        .unwrap();
        assert_eq!(info.connected_by.as_deref(), Some("bluetooth"));
        assert_eq!(info.custom_name.as_deref(), Some("lab insight"));
        assert_eq!(info.motion_sensors.as_ref().map(Vec::len), Some(4));
        assert!(info.dongle_serial.is_none());
        assert!(info.extra.contains_key("virtualHeadsetId"));
    }

    #[test]
    fn test_discovered_headset_has_only_identity() {
        let info: HeadsetInfo =
            serde_json::from_value(json!({"id": "EPOCX-E50202E1", "status": "discovered"}))
                .unwrap();
        assert_eq!(info.status, "discovered");
        assert!(info.sensors.is_none() && info.firmware.is_none());
        assert!(info.extra.is_empty());
    }
}
