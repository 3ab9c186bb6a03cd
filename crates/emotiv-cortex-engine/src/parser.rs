//! # Stream Parser
//!
//! Decodes flattened [`StreamFrame`] rows into typed events and publishes
//! them on the owning session's topics.
//!
//! | Channel | Type | Delivery |
//! |---------|------|----------|
//! | `com` | [`MentalCommand`] | every row |
//! | `sys` | [`SystemEvent`] | every row |
//! | `fac` | [`FacialExpression`] | every row |
//! | `dev` | [`DeviceInfo`] | latest only |
//!
//! A row that doesn't decode is logged and skipped; it never closes the
//! session.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::events::{LatestTopic, QueueTopic, Subscription};
use crate::protocol::streams::{Channel, StreamFrame};

/// Contact-quality header holding the overall score rather than a sensor.
const OVERALL_HEADER: &str = "OVERALL";

fn f64_to_f32(value: f64) -> Option<f32> {
    if !value.is_finite() {
        return None;
    }
    value.to_string().parse::<f32>().ok()
}

fn value_to_f32(value: &Value) -> Option<f32> {
    f64_to_f32(value.as_f64()?)
}

fn value_to_u8(value: &Value) -> Option<u8> {
    if let Some(int) = value.as_u64() {
        return u8::try_from(int).ok();
    }
    let float = value.as_f64()?;
    if !float.is_finite() {
        return None;
    }
    format!("{float:.0}").parse::<u8>().ok()
}

// ─── Decoded types ──────────────────────────────────────────────────────

/// Parsed mental command data from a `com` row.
#[derive(Debug, Clone, PartialEq)]
pub struct MentalCommand {
    /// Timestamp (Unix seconds as f64, from Cortex).
    pub timestamp: f64,
    /// The detected action name (e.g., "push", "pull", "neutral").
    pub action: String,
    /// Action intensity, clamped to 0.0–1.0.
    pub power: f32,
}

impl MentalCommand {
    fn decode(frame: &StreamFrame) -> Option<Self> {
        let action = frame.values.first()?.as_str()?.to_string();
        let power = value_to_f32(frame.values.get(1)?)?.clamp(0.0, 1.0);
        Some(Self {
            timestamp: frame.timestamp,
            action,
            power,
        })
    }
}

/// Parsed facial expression data from a `fac` row.
#[derive(Debug, Clone, PartialEq)]
pub struct FacialExpression {
    pub timestamp: f64,
    /// Eye action (e.g., "blink", "winkL", "winkR", "lookL", "lookR").
    pub eye_action: String,
    /// Upper face action (e.g., "surprise", "frown").
    pub upper_face_action: String,
    /// Upper face action power 0.0–1.0.
    pub upper_face_power: f32,
    /// Lower face action (e.g., "smile", "clench").
    pub lower_face_action: String,
    /// Lower face action power 0.0–1.0.
    pub lower_face_power: f32,
}

impl FacialExpression {
    fn decode(frame: &StreamFrame) -> Option<Self> {
        let fac = &frame.values;
        Some(Self {
            timestamp: frame.timestamp,
            eye_action: fac.first()?.as_str()?.to_string(),
            upper_face_action: fac.get(1)?.as_str()?.to_string(),
            upper_face_power: value_to_f32(fac.get(2)?)?,
            lower_face_action: fac.get(3)?.as_str()?.to_string(),
            lower_face_power: value_to_f32(fac.get(4)?)?,
        })
    }
}

/// Event code carried by a `sys` row, with the detection prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemEventCode {
    Started,
    Succeeded,
    Failed,
    Completed,
    Rejected,
    Reset,
    DataErased,
    AutoSamplingNeutralCompleted,
    SignatureUpdated,
    Other(String),
}

impl SystemEventCode {
    /// Parse an event name such as `MC_Succeeded` or `FE_Started`.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        let code = name
            .strip_prefix("MC_")
            .or_else(|| name.strip_prefix("FE_"))
            .unwrap_or(name);
        match code {
            "Started" => Self::Started,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Completed" => Self::Completed,
            "Rejected" => Self::Rejected,
            "Reset" => Self::Reset,
            "DataErased" => Self::DataErased,
            "AutoSamplingNeutralCompleted" => Self::AutoSamplingNeutralCompleted,
            "SignatureUpdated" => Self::SignatureUpdated,
            _ => Self::Other(name.to_string()),
        }
    }
}

/// Parsed `sys` row: `[detection, event, message?]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemEvent {
    pub timestamp: f64,
    /// Detection the event belongs to (`mentalCommand` or `facialExpression`).
    pub detection: String,
    pub code: SystemEventCode,
    /// Raw event name as sent by Cortex.
    pub message: String,
}

impl SystemEvent {
    /// Whether this event drives the mental-command training machine.
    #[must_use]
    pub fn is_mental_command(&self) -> bool {
        self.detection == "mentalCommand"
    }

    fn decode(frame: &StreamFrame) -> Option<Self> {
        let detection = frame.values.first()?.as_str()?.to_string();
        let message = frame.values.get(1)?.as_str()?.to_string();
        Some(Self {
            timestamp: frame.timestamp,
            detection,
            code: SystemEventCode::parse(&message),
            message,
        })
    }
}

/// Parsed `dev` row.
///
/// Cortex reports contact quality per sensor on a 0–4 scale and the overall
/// score on 0–100. Values are passed through unscaled.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub timestamp: f64,
    /// Battery level 0–4 (coarse indicator).
    pub battery_level: u8,
    /// Wireless signal strength.
    pub signal_strength: f32,
    /// Contact quality per sensor name, without the overall column.
    pub contact_quality: BTreeMap<String, f32>,
    /// Overall contact quality, when the headers include an `OVERALL` column.
    pub overall: Option<f32>,
    /// Precise battery percentage 0–100.
    pub battery_percent: u8,
}

impl DeviceInfo {
    /// Decode a row laid out as `[battery, signal, <headers...>, batteryPercent]`.
    fn decode(frame: &StreamFrame, headers: &[String]) -> Option<Self> {
        let dev = &frame.values;
        if dev.len() < headers.len() + 3 {
            return None;
        }

        let battery_level = value_to_u8(&dev[0])?;
        let signal_strength = value_to_f32(&dev[1])?;

        let mut contact_quality = BTreeMap::new();
        let mut overall = None;
        for (header, value) in headers.iter().zip(&dev[2..2 + headers.len()]) {
            let quality = value_to_f32(value)?;
            if header.eq_ignore_ascii_case(OVERALL_HEADER) {
                overall = Some(quality);
            } else {
                contact_quality.insert(header.clone(), quality);
            }
        }

        let battery_percent = value_to_u8(&dev[2 + headers.len()])?;

        Some(Self {
            timestamp: frame.timestamp,
            battery_level,
            signal_strength,
            contact_quality,
            overall,
            battery_percent,
        })
    }
}

// ─── Per-session decoding ───────────────────────────────────────────────

/// A type that can be decoded from a channel and subscribed to per session.
pub trait ChannelData: Clone + Send + Sync + 'static {
    /// The channel this type is decoded from.
    const CHANNEL: Channel;

    #[doc(hidden)]
    fn subscribe(streams: &SessionStreams) -> Subscription<Self>;
}

impl ChannelData for MentalCommand {
    const CHANNEL: Channel = Channel::MentalCommand;

    fn subscribe(streams: &SessionStreams) -> Subscription<Self> {
        streams.mental_commands.subscribe()
    }
}

impl ChannelData for SystemEvent {
    const CHANNEL: Channel = Channel::SystemEvent;

    fn subscribe(streams: &SessionStreams) -> Subscription<Self> {
        streams.system_events.subscribe()
    }
}

impl ChannelData for FacialExpression {
    const CHANNEL: Channel = Channel::FacialExpression;

    fn subscribe(streams: &SessionStreams) -> Subscription<Self> {
        streams.facial_expressions.subscribe()
    }
}

impl ChannelData for DeviceInfo {
    const CHANNEL: Channel = Channel::DeviceInfo;

    fn subscribe(streams: &SessionStreams) -> Subscription<Self> {
        streams.device_info.subscribe()
    }
}

/// Decoder state and output topics of one session.
///
/// Dropping it closes every subscription handed out for the session.
#[derive(Debug, Default)]
pub struct SessionStreams {
    dev_headers: Option<Vec<String>>,
    mental_commands: QueueTopic<MentalCommand>,
    system_events: QueueTopic<SystemEvent>,
    facial_expressions: QueueTopic<FacialExpression>,
    device_info: LatestTopic<DeviceInfo>,
}

impl SessionStreams {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record the contact-quality headers from a `dev` subscribe result.
    pub(crate) fn configure_device_headers(&mut self, headers: Vec<String>) {
        tracing::debug!(?headers, "Configured device-info headers");
        self.dev_headers = Some(headers);
    }

    /// Decode `frame` and publish it. Returns the decoded system event, if any,
    /// so the caller can feed the training machine.
    pub(crate) fn dispatch(&self, frame: &StreamFrame) -> Option<SystemEvent> {
        match frame.channel {
            Channel::MentalCommand => {
                match MentalCommand::decode(frame) {
                    Some(command) => self.mental_commands.publish(command),
                    None => skip(frame),
                }
                None
            }
            Channel::FacialExpression => {
                match FacialExpression::decode(frame) {
                    Some(expression) => self.facial_expressions.publish(expression),
                    None => skip(frame),
                }
                None
            }
            Channel::SystemEvent => match SystemEvent::decode(frame) {
                Some(event) => {
                    self.system_events.publish(event.clone());
                    Some(event)
                }
                None => {
                    skip(frame);
                    None
                }
            },
            Channel::DeviceInfo => {
                let Some(headers) = &self.dev_headers else {
                    tracing::warn!(
                        session_id = %frame.session_id,
                        "Skipping dev row received before its headers"
                    );
                    return None;
                };
                match DeviceInfo::decode(frame, headers) {
                    Some(info) => self.device_info.publish(info),
                    None => skip(frame),
                }
                None
            }
        }
    }

    /// Most recent device info, if any row has been decoded.
    pub(crate) fn latest_device_info(&self) -> Option<DeviceInfo> {
        self.device_info.current()
    }
}

fn skip(frame: &StreamFrame) {
    tracing::warn!(
        session_id = %frame.session_id,
        channel = %frame.channel,
        values = ?frame.values,
        "Skipping undecodable stream row"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(channel: Channel, values: Value) -> StreamFrame {
        StreamFrame {
            session_id: "s-1".into(),
            channel,
            timestamp: 1_700_000_000.25,
            values: values.as_array().cloned().unwrap(),
        }
    }

    fn insight_headers() -> Vec<String> {
        ["AF3", "T7", "Pz", "T8", "AF4", "OVERALL"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_decode_mental_command_clamps_power() {
        let cmd = MentalCommand::decode(&frame(Channel::MentalCommand, json!(["push", 1.7]))).unwrap();
        assert_eq!(cmd.action, "push");
        assert!((cmd.power - 1.0).abs() < f32::EPSILON);
        assert!((cmd.timestamp - 1_700_000_000.25).abs() < f64::EPSILON);

        let cmd = MentalCommand::decode(&frame(Channel::MentalCommand, json!(["neutral", -0.2]))).unwrap();
        assert!(cmd.power.abs() < f32::EPSILON);
    }

    #[test]
    fn test_decode_mental_command_rejects_bad_row() {
        assert!(MentalCommand::decode(&frame(Channel::MentalCommand, json!([0.5, "push"]))).is_none());
        assert!(MentalCommand::decode(&frame(Channel::MentalCommand, json!(["push"]))).is_none());
    }

    #[test]
    fn test_decode_facial_expression() {
        let fac = FacialExpression::decode(&frame(
            Channel::FacialExpression,
            json!(["blink", "surprise", 0.6, "smile", 0.3]),
        ))
        .unwrap();
        assert_eq!(fac.eye_action, "blink");
        assert_eq!(fac.upper_face_action, "surprise");
        assert!((fac.lower_face_power - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_system_event_codes() {
        assert_eq!(SystemEventCode::parse("MC_Started"), SystemEventCode::Started);
        assert_eq!(SystemEventCode::parse("FE_Succeeded"), SystemEventCode::Succeeded);
        assert_eq!(SystemEventCode::parse("MC_DataErased"), SystemEventCode::DataErased);
        assert_eq!(
            SystemEventCode::parse("MC_AutoSamplingNeutralCompleted"),
            SystemEventCode::AutoSamplingNeutralCompleted
        );
        assert_eq!(
            SystemEventCode::parse("HeadsetScanFinished"),
            SystemEventCode::Other("HeadsetScanFinished".into())
        );
    }

    #[test]
    fn test_decode_system_event() {
        let event =
            SystemEvent::decode(&frame(Channel::SystemEvent, json!(["mentalCommand", "MC_Succeeded"]))).unwrap();
        assert!(event.is_mental_command());
        assert_eq!(event.code, SystemEventCode::Succeeded);
        assert_eq!(event.message, "MC_Succeeded");
    }

    #[test]
    fn test_decode_device_info_by_header_offset() {
        let headers = insight_headers();
        let row = frame(
            Channel::DeviceInfo,
            json!([3, 1.0, 4, 4, 2, 3, 4, 85, 72]),
        );
        let info = DeviceInfo::decode(&row, &headers).unwrap();

        assert_eq!(info.battery_level, 3);
        assert!((info.signal_strength - 1.0).abs() < f32::EPSILON);
        assert_eq!(info.contact_quality.len(), headers.len() - 1);
        assert!(!info.contact_quality.contains_key("OVERALL"));
        assert!((info.contact_quality["Pz"] - 2.0).abs() < f32::EPSILON);
        assert_eq!(info.overall, Some(85.0));
        assert_eq!(info.battery_percent, 72);
    }

    #[test]
    fn test_decode_device_info_short_row() {
        let row = frame(Channel::DeviceInfo, json!([3, 1.0, 4, 4]));
        assert!(DeviceInfo::decode(&row, &insight_headers()).is_none());
    }

    #[test]
    fn test_dev_row_before_headers_is_skipped() {
        let streams = SessionStreams::new();
        let mut sub = DeviceInfo::subscribe(&streams);
        streams.dispatch(&frame(Channel::DeviceInfo, json!([3, 1.0, 4, 4, 2, 3, 4, 85, 72])));
        assert!(sub.poll().is_empty());
        assert!(streams.latest_device_info().is_none());
    }

    #[test]
    fn test_dispatch_publishes_to_channel_subscribers() {
        let mut streams = SessionStreams::new();
        streams.configure_device_headers(insight_headers());
        let mut commands = MentalCommand::subscribe(&streams);
        let mut devices = DeviceInfo::subscribe(&streams);

        streams.dispatch(&frame(Channel::MentalCommand, json!(["push", 0.4])));
        streams.dispatch(&frame(Channel::MentalCommand, json!(["pull", 0.5])));
        streams.dispatch(&frame(Channel::DeviceInfo, json!([3, 1.0, 4, 4, 2, 3, 4, 80, 70])));
        streams.dispatch(&frame(Channel::DeviceInfo, json!([3, 1.0, 4, 4, 4, 4, 4, 95, 69])));

        let actions: Vec<String> = commands.poll().into_iter().map(|c| c.action).collect();
        assert_eq!(actions, vec!["push", "pull"]);

        let latest = devices.poll();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].overall, Some(95.0));
    }

    #[test]
    fn test_dispatch_returns_system_event() {
        let streams = SessionStreams::new();
        let event = streams.dispatch(&frame(Channel::SystemEvent, json!(["mentalCommand", "MC_Started"])));
        assert_eq!(event.unwrap().code, SystemEventCode::Started);
        assert!(streams
            .dispatch(&frame(Channel::MentalCommand, json!(["push", 0.4])))
            .is_none());
    }

    #[test]
    fn test_dropping_streams_closes_subscriptions() {
        let streams = SessionStreams::new();
        let mut sub = MentalCommand::subscribe(&streams);
        drop(streams);
        assert!(sub.poll().is_empty());
        assert!(sub.is_closed());
    }
}
