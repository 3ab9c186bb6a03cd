//! # Headset Discovery
//!
//! Queries the headsets Cortex can see, pairs and unpairs them, and
//! publishes the list on the headsets topic whenever it changes.
//!
//! ## Supported Headsets
//!
//! | Model | Id prefix |
//! |-------|-----------|
//! | EPOC+ | `EPOCPLUS` |
//! | EPOC Flex | `EPOCFLEX` |
//! | EPOC X | `EPOCX` |
//! | Insight 2 | `INSIGHT2` |
//! | Insight | `INSIGHT` |
//! | MN8 | `MN8` |
//! | EPOC | `EPOC` |
//!
//! ```
//! use emotiv_cortex_engine::headsets::HeadsetModel;
//!
//! assert_eq!(HeadsetModel::from_headset_id("INSIGHT-A1B2C3D4"), HeadsetModel::Insight);
//! assert_eq!(HeadsetModel::from_headset_id("EPOCX-AABBCCDD"), HeadsetModel::EpocX);
//! ```

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::engine::EngineContext;
use crate::error::CortexResult;
use crate::events::EngineEvent;
use crate::lock;
use crate::protocol::constants::Methods;
use crate::protocol::headset::{DeviceCommand, HeadsetInfo};

/// Emotiv headset model, inferred from the id prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeadsetModel {
    EpocPlus,
    EpocFlex,
    EpocX,
    Insight2,
    Insight,
    Mn8,
    Epoc,
    Unknown(String),
}

impl HeadsetModel {
    /// Longer prefixes first, so `EPOCX` never matches as `EPOC`.
    const PREFIXES: [(&'static str, HeadsetModel); 7] = [
        ("EPOCPLUS", HeadsetModel::EpocPlus),
        ("EPOCFLEX", HeadsetModel::EpocFlex),
        ("EPOCX", HeadsetModel::EpocX),
        ("INSIGHT2", HeadsetModel::Insight2),
        ("INSIGHT", HeadsetModel::Insight),
        ("MN8", HeadsetModel::Mn8),
        ("EPOC", HeadsetModel::Epoc),
    ];

    /// Infer the headset model from a headset ID string.
    #[must_use]
    pub fn from_headset_id(headset_id: &str) -> Self {
        let id_upper = headset_id.to_uppercase();
        Self::PREFIXES
            .iter()
            .find(|(prefix, _)| id_upper.starts_with(prefix))
            .map_or_else(
                || HeadsetModel::Unknown(headset_id.to_string()),
                |(_, model)| model.clone(),
            )
    }
}

impl fmt::Display for HeadsetModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeadsetModel::EpocPlus => write!(f, "EPOC+"),
            HeadsetModel::EpocFlex => write!(f, "EPOC Flex"),
            HeadsetModel::EpocX => write!(f, "EPOC X"),
            HeadsetModel::Insight2 => write!(f, "Insight 2"),
            HeadsetModel::Insight => write!(f, "Insight"),
            HeadsetModel::Mn8 => write!(f, "MN8"),
            HeadsetModel::Epoc => write!(f, "EPOC"),
            HeadsetModel::Unknown(id) => write!(f, "Unknown ({id})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HeadsetStatus {
    Discovered,
    Connecting,
    Connected,
    /// Connected and owned by a live session of this engine.
    InSession,
    Unknown(String),
}

impl HeadsetStatus {
    fn from_wire(status: &str) -> Self {
        match status {
            "discovered" => Self::Discovered,
            "connecting" => Self::Connecting,
            "connected" => Self::Connected,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// How the headset reaches the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    Dongle,
    Bluetooth,
    Extender,
    UsbCable,
    Unknown,
}

impl ConnectionType {
    fn from_wire(connected_by: Option<&str>) -> Self {
        match connected_by {
            Some("dongle") => Self::Dongle,
            Some("bluetooth") => Self::Bluetooth,
            Some("extender") => Self::Extender,
            Some("usb cable") => Self::UsbCable,
            _ => Self::Unknown,
        }
    }
}

/// A headset as last reported by `queryHeadsets`.
#[derive(Debug, Clone, PartialEq)]
pub struct Headset {
    pub id: String,
    pub status: HeadsetStatus,
    pub connection_type: ConnectionType,
    pub firmware: Option<String>,
    pub dongle_serial: Option<String>,
    pub sensors: Vec<String>,
    pub motion_sensors: Vec<String>,
    pub mode: Option<String>,
    pub settings: Option<Value>,
    pub custom_name: Option<String>,
    pub model: HeadsetModel,
}

impl Headset {
    /// Equal in the fields that matter for change detection.
    #[must_use]
    pub fn same_state(&self, other: &Headset) -> bool {
        self.id == other.id
            && self.status == other.status
            && self.connection_type == other.connection_type
    }
}

impl From<HeadsetInfo> for Headset {
    fn from(info: HeadsetInfo) -> Self {
        Self {
            model: HeadsetModel::from_headset_id(&info.id),
            status: HeadsetStatus::from_wire(&info.status),
            connection_type: ConnectionType::from_wire(info.connected_by.as_deref()),
            firmware: info.firmware,
            dongle_serial: info.dongle_serial,
            sensors: info.sensors.unwrap_or_default(),
            motion_sensors: info.motion_sensors.unwrap_or_default(),
            mode: info.mode,
            settings: info.settings,
            custom_name: info.custom_name,
            id: info.id,
        }
    }
}

/// Remembers the last headset list for change detection.
#[derive(Debug, Default)]
pub(crate) struct HeadsetFinder {
    last: Mutex<Option<Vec<Headset>>>,
}

impl HeadsetFinder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Store `headsets`; `true` if it differs from the previous list.
    pub(crate) fn record(&self, headsets: &[Headset]) -> bool {
        let mut last = lock(&self.last);
        let changed = last.as_ref().is_none_or(|previous| {
            previous.len() != headsets.len()
                || previous
                    .iter()
                    .zip(headsets)
                    .any(|(old, new)| !old.same_state(new))
        });
        *last = Some(headsets.to_vec());
        changed
    }

    pub(crate) fn last(&self) -> Option<Vec<Headset>> {
        lock(&self.last).clone()
    }

    /// Forget the previous list so the next query publishes.
    pub(crate) fn clear(&self) {
        *lock(&self.last) = None;
    }
}

/// Query the headsets, publishing the list if it changed.
pub(crate) async fn query_headsets(ctx: &EngineContext) -> CortexResult<Vec<Headset>> {
    let infos: Vec<HeadsetInfo> = ctx.rpc.call_as(Methods::QUERY_HEADSETS, json!({})).await?;
    let headsets: Vec<Headset> = infos
        .into_iter()
        .map(|info| {
            let mut headset = Headset::from(info);
            if headset.status == HeadsetStatus::Connected
                && ctx.sessions.session_for_headset(&headset.id).is_some()
            {
                headset.status = HeadsetStatus::InSession;
            }
            headset
        })
        .collect();

    if ctx.headsets.record(&headsets) {
        tracing::info!(count = headsets.len(), "Headset list changed");
        ctx.hub.emit(EngineEvent::HeadsetsChanged(headsets.clone()));
    }
    Ok(headsets)
}

/// Issue `controlDevice`. `headset_id` is ignored by `refresh`.
pub(crate) async fn control_device(
    ctx: &EngineContext,
    command: DeviceCommand,
    headset_id: Option<&str>,
) -> CortexResult<()> {
    let mut params = json!({ "command": command.as_str() });
    if let Some(headset_id) = headset_id {
        params["headset"] = Value::from(headset_id);
    }
    ctx.rpc.call(Methods::CONTROL_DEVICE, params).await?;
    tracing::info!(command = command.as_str(), headset = ?headset_id, "Device command accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, status: &str, connected_by: Option<&str>) -> HeadsetInfo {
        serde_json::from_value(json!({
            "id": id,
            "status": status,
            "connectedBy": connected_by,
            "sensors": ["AF3", "T7", "Pz", "T8", "AF4"],
        }))
        .unwrap()
    }

    #[test]
    fn test_model_from_prefix() {
        assert_eq!(HeadsetModel::from_headset_id("EPOCPLUS-1"), HeadsetModel::EpocPlus);
        assert_eq!(HeadsetModel::from_headset_id("EPOCFLEX-1"), HeadsetModel::EpocFlex);
        assert_eq!(HeadsetModel::from_headset_id("epocx-1"), HeadsetModel::EpocX);
        assert_eq!(HeadsetModel::from_headset_id("INSIGHT2-1"), HeadsetModel::Insight2);
        assert_eq!(HeadsetModel::from_headset_id("INSIGHT-1"), HeadsetModel::Insight);
        assert_eq!(HeadsetModel::from_headset_id("MN8-1"), HeadsetModel::Mn8);
        assert_eq!(HeadsetModel::from_headset_id("EPOC-1"), HeadsetModel::Epoc);
        assert_eq!(
            HeadsetModel::from_headset_id("CROWN-1"),
            HeadsetModel::Unknown("CROWN-1".into())
        );
    }

    #[test]
    fn test_headset_from_info() {
        let headset = Headset::from(info("INSIGHT-A1", "connected", Some("bluetooth")));
        assert_eq!(headset.status, HeadsetStatus::Connected);
        assert_eq!(headset.connection_type, ConnectionType::Bluetooth);
        assert_eq!(headset.model, HeadsetModel::Insight);
        assert_eq!(headset.sensors.len(), 5);

        let headset = Headset::from(info("EPOCX-1", "pairing", Some("usb cable")));
        assert_eq!(headset.status, HeadsetStatus::Unknown("pairing".into()));
        assert_eq!(headset.connection_type, ConnectionType::UsbCable);
    }

    #[test]
    fn test_same_state_ignores_details() {
        let a = Headset::from(info("INSIGHT-A1", "connected", Some("dongle")));
        let mut b = a.clone();
        b.firmware = Some("930".into());
        assert!(a.same_state(&b));
        b.status = HeadsetStatus::Discovered;
        assert!(!a.same_state(&b));
    }

    #[test]
    fn test_finder_reports_changes_only() {
        let finder = HeadsetFinder::new();
        let list = vec![Headset::from(info("INSIGHT-A1", "discovered", None))];
        assert!(finder.record(&list));
        assert!(!finder.record(&list));

        let connected = vec![Headset::from(info("INSIGHT-A1", "connected", Some("dongle")))];
        assert!(finder.record(&connected));
        assert!(finder.record(&[]));
        assert!(!finder.record(&[]));

        finder.clear();
        assert!(finder.last().is_none());
        assert!(finder.record(&[]));
    }
}
