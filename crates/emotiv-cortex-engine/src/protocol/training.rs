//! Detection and `training` payloads.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Detection a training or detection query refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionType {
    MentalCommand,
    FacialExpression,
}

impl DetectionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DetectionType::MentalCommand => "mentalCommand",
            DetectionType::FacialExpression => "facialExpression",
        }
    }
}

/// `status` of a `training` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainingStatus {
    Start,
    Accept,
    Reject,
    /// Cancel the sample in progress.
    Reset,
    /// Drop every stored sample of the action.
    Erase,
}

impl TrainingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TrainingStatus::Start => "start",
            TrainingStatus::Accept => "accept",
            TrainingStatus::Reject => "reject",
            TrainingStatus::Reset => "reset",
            TrainingStatus::Erase => "erase",
        }
    }
}

/// Result of `getDetectionInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DetectionInfo {
    pub actions: Vec<String>,
    /// Valid `training` statuses.
    pub controls: Vec<String>,
    /// `sys` events the detection can emit.
    pub events: Vec<String>,
}

/// Result of `getTrainedSignatureActions`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainedSignatureActions {
    pub total_times_training: u32,
    #[serde(default)]
    pub trained_actions: Vec<TrainedAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrainedAction {
    pub action: String,
    pub times: u32,
}

/// Result of `getTrainingTime`: length of the last sample, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TrainingTime {
    pub time: f64,
}

/// Result of `mentalCommandTrainingThreshold`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingThreshold {
    /// Score a sample must reach to succeed.
    pub current_threshold: f64,
    #[serde(default)]
    pub last_training_score: f64,
}

/// What a detection query is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionTarget {
    /// A stored profile, by name.
    Profile(String),
    /// The profile loaded in a live session, by session id.
    Session(String),
}

impl DetectionTarget {
    /// Insert the `profile` or `session` key into a params object.
    pub fn apply(&self, params: &mut Map<String, Value>) {
        let (key, value) = match self {
            DetectionTarget::Profile(name) => ("profile", name),
            DetectionTarget::Session(id) => ("session", id),
        };
        params.insert(key.to_string(), Value::from(value.as_str()));
    }
}
