//! # Mental-Command Training
//!
//! Each session carries a [`TrainingTracker`] recording the stage of every
//! action trained in it. Stages move on two inputs: the result of the
//! `training` RPC issued by [`Trainer`], and the `MC_*` system events Cortex
//! publishes on the `sys` channel. Whichever arrives first applies the
//! transition; the other is a no-op.
//!
//! ```text
//!            start           MC_Succeeded          accept
//!   Idle ──────────► Started ────────────► Succeeded ──────► Completed
//!    ▲                  │                     │
//!    │    MC_Failed     │                     │ reject
//!    └──────────────────┘                     └──────────► Rejected
//! ```
//!
//! A round is one completed `neutral` sample plus one completed sample of
//! any other action. Feedback unlocks after `feedback_rounds` rounds and
//! training may finish after `min_rounds`.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value, json};

use crate::config::TrainingConfig;
use crate::engine::EngineContext;
use crate::error::{ApiErrorKind, CortexError, CortexResult};
use crate::events::EngineEvent;
use crate::parser::{SystemEvent, SystemEventCode};
use crate::protocol::constants::Methods;
use crate::protocol::training::{
    DetectionInfo, DetectionTarget, DetectionType, TrainedSignatureActions, TrainingStatus,
    TrainingThreshold, TrainingTime,
};

/// Name of the baseline action every round includes.
pub const NEUTRAL_ACTION: &str = "neutral";

/// `active` of a conflict reported by the service, which does not name the busy action.
const UNKNOWN_ACTION: &str = "unknown";

/// Stage of one action within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TrainingStage {
    #[default]
    Idle,
    Started,
    Succeeded,
    /// Reported on the failure event only; the action returns to `Idle`.
    Failed,
    Completed,
    Rejected,
}

impl TrainingStage {
    /// Started and Succeeded block any other start in the session.
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(self, TrainingStage::Started | TrainingStage::Succeeded)
    }
}

impl fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrainingStage::Idle => "idle",
            TrainingStage::Started => "started",
            TrainingStage::Succeeded => "succeeded",
            TrainingStage::Failed => "failed",
            TrainingStage::Completed => "completed",
            TrainingStage::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Input that may move an action's stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrainingSignal {
    Started,
    Succeeded,
    Failed,
    Completed,
    Rejected,
    Reset,
    DataErased,
    AutoSamplingNeutralCompleted,
    SignatureUpdated,
}

impl TrainingSignal {
    /// Map a `sys` event code. Unrecognized codes carry no signal.
    #[must_use]
    pub fn from_code(code: &SystemEventCode) -> Option<Self> {
        Some(match code {
            SystemEventCode::Started => Self::Started,
            SystemEventCode::Succeeded => Self::Succeeded,
            SystemEventCode::Failed => Self::Failed,
            SystemEventCode::Completed => Self::Completed,
            SystemEventCode::Rejected => Self::Rejected,
            SystemEventCode::Reset => Self::Reset,
            SystemEventCode::DataErased => Self::DataErased,
            SystemEventCode::AutoSamplingNeutralCompleted => Self::AutoSamplingNeutralCompleted,
            SystemEventCode::SignatureUpdated => Self::SignatureUpdated,
            SystemEventCode::Other(_) => return None,
        })
    }
}

/// Published whenever an action changes stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingEvent {
    pub session_id: String,
    pub headset_id: String,
    pub action: String,
    pub signal: TrainingSignal,
    /// Stage entered by this transition.
    pub stage: TrainingStage,
    /// Completed rounds in the session after the transition.
    pub rounds_trained: u32,
}

/// A transition applied by the tracker, before session ids are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingTransition {
    pub action: String,
    pub signal: TrainingSignal,
    pub stage: TrainingStage,
    pub rounds_trained: u32,
}

impl TrainingTransition {
    pub(crate) fn into_event(self, session_id: &str, headset_id: &str) -> TrainingEvent {
        TrainingEvent {
            session_id: session_id.to_string(),
            headset_id: headset_id.to_string(),
            action: self.action,
            signal: self.signal,
            stage: self.stage,
            rounds_trained: self.rounds_trained,
        }
    }
}

/// Round counters and feedback gates for a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingProgress {
    pub rounds_trained: u32,
    pub feedback_enabled: bool,
    pub can_finish: bool,
    /// `rounds_trained / max_rounds`, capped at 1.0.
    pub fraction: f64,
}

#[derive(Debug, Clone, Default)]
struct ActionRecord {
    stage: TrainingStage,
    times_completed: u32,
}

/// Per-session training state.
#[derive(Debug, Clone)]
pub struct TrainingTracker {
    actions: HashMap<String, ActionRecord>,
    /// Action the `sys` events refer to: the current or last started one.
    current: Option<String>,
    neutral_done: bool,
    action_done: bool,
    rounds_trained: u32,
    config: TrainingConfig,
}

impl TrainingTracker {
    #[must_use]
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            actions: HashMap::new(),
            current: None,
            neutral_done: false,
            action_done: false,
            rounds_trained: 0,
            config: config.clone(),
        }
    }

    #[must_use]
    pub fn stage(&self, action: &str) -> TrainingStage {
        self.actions
            .get(action)
            .map_or(TrainingStage::Idle, |record| record.stage)
    }

    /// Accepted samples of `action` since it was last erased.
    #[must_use]
    pub fn times_completed(&self, action: &str) -> u32 {
        self.actions.get(action).map_or(0, |record| record.times_completed)
    }

    /// Action currently or most recently started.
    #[must_use]
    pub fn current_action(&self) -> Option<&str> {
        self.current.as_deref()
    }

    #[must_use]
    pub fn rounds_trained(&self) -> u32 {
        self.rounds_trained
    }

    #[must_use]
    pub fn feedback_enabled(&self) -> bool {
        self.rounds_trained >= self.config.feedback_rounds
    }

    #[must_use]
    pub fn can_finish(&self) -> bool {
        self.rounds_trained >= self.config.min_rounds
    }

    #[must_use]
    pub fn progress(&self) -> TrainingProgress {
        let fraction = if self.config.max_rounds == 0 {
            1.0
        } else {
            (f64::from(self.rounds_trained) / f64::from(self.config.max_rounds)).min(1.0)
        };
        TrainingProgress {
            rounds_trained: self.rounds_trained,
            feedback_enabled: self.feedback_enabled(),
            can_finish: self.can_finish(),
            fraction,
        }
    }

    /// Fail with `TrainingConflict` if any action in the session is busy.
    pub fn check_start(&self, session_id: &str, requested: &str) -> CortexResult<()> {
        match self.actions.iter().find(|(_, record)| record.stage.is_busy()) {
            Some((active, _)) => Err(CortexError::TrainingConflict {
                session_id: session_id.to_string(),
                active: active.clone(),
                requested: requested.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Fail with `InvalidState` unless `action` has a sample awaiting a decision.
    pub fn check_decision(&self, action: &str, operation: &str) -> CortexResult<()> {
        let stage = self.stage(action);
        if stage == TrainingStage::Succeeded {
            Ok(())
        } else {
            Err(CortexError::invalid_state(
                format!("{operation} '{action}'"),
                format!("training is {stage}"),
            ))
        }
    }

    /// Apply a `sys` event to the current action.
    pub fn apply_system_event(&mut self, event: &SystemEvent) -> Option<TrainingTransition> {
        if !event.is_mental_command() {
            return None;
        }
        let signal = TrainingSignal::from_code(&event.code)?;
        let Some(action) = self.current.clone() else {
            tracing::debug!(event = %event.message, "Training event with no action in progress");
            return None;
        };
        self.apply(&action, signal)
    }

    /// Move `action` on `signal`. Returns `None` when nothing changed.
    pub fn apply(&mut self, action: &str, signal: TrainingSignal) -> Option<TrainingTransition> {
        let current = self.stage(action);
        let entered = match signal {
            TrainingSignal::Started => {
                (current != TrainingStage::Started).then_some(TrainingStage::Started)
            }
            TrainingSignal::Succeeded => {
                (current == TrainingStage::Started).then_some(TrainingStage::Succeeded)
            }
            TrainingSignal::Failed => {
                (current == TrainingStage::Started).then_some(TrainingStage::Failed)
            }
            TrainingSignal::Completed => {
                (current == TrainingStage::Succeeded).then_some(TrainingStage::Completed)
            }
            TrainingSignal::Rejected => {
                (current == TrainingStage::Succeeded).then_some(TrainingStage::Rejected)
            }
            TrainingSignal::Reset => (current != TrainingStage::Idle).then_some(TrainingStage::Idle),
            TrainingSignal::DataErased => {
                let has_data = current != TrainingStage::Idle || self.times_completed(action) > 0;
                has_data.then_some(TrainingStage::Idle)
            }
            TrainingSignal::AutoSamplingNeutralCompleted | TrainingSignal::SignatureUpdated => {
                Some(current)
            }
        }?;

        let record = self.actions.entry(action.to_string()).or_default();
        match signal {
            TrainingSignal::Started => self.current = Some(action.to_string()),
            TrainingSignal::Completed => {
                record.times_completed += 1;
                self.complete_round_part(action);
            }
            TrainingSignal::DataErased => {
                record.times_completed = 0;
                self.erase_round_parts(action);
            }
            _ => {}
        }
        let record = self.actions.entry(action.to_string()).or_default();
        record.stage = if entered == TrainingStage::Failed {
            TrainingStage::Idle
        } else {
            entered
        };

        Some(TrainingTransition {
            action: action.to_string(),
            signal,
            stage: entered,
            rounds_trained: self.rounds_trained,
        })
    }

    /// Undo an optimistic start whose RPC failed.
    pub fn abort_start(&mut self, action: &str) -> Option<TrainingTransition> {
        if self.stage(action) == TrainingStage::Started {
            self.apply(action, TrainingSignal::Reset)
        } else {
            None
        }
    }

    /// Every counted round holds a sample of `action`, so none survive its erase.
    fn erase_round_parts(&mut self, action: &str) {
        if action == NEUTRAL_ACTION {
            self.neutral_done = false;
        } else {
            self.action_done = false;
        }
        if self.rounds_trained > 0 {
            tracing::info!(action, rounds = self.rounds_trained, "Training rounds discarded by erase");
        }
        self.rounds_trained = 0;
    }

    fn complete_round_part(&mut self, action: &str) {
        if action == NEUTRAL_ACTION {
            self.neutral_done = true;
        } else {
            self.action_done = true;
        }
        if self.neutral_done && self.action_done {
            self.neutral_done = false;
            self.action_done = false;
            self.rounds_trained += 1;
            tracing::info!(rounds = self.rounds_trained, "Training round completed");
        }
    }
}

// ─── Trainer façade ─────────────────────────────────────────────────────

/// Training operations on the headset's live session.
///
/// Obtained from [`CortexEngine::training`](crate::CortexEngine::training).
pub struct Trainer<'a> {
    ctx: &'a EngineContext,
}

impl<'a> Trainer<'a> {
    pub(crate) fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Start recording a sample of `action`.
    ///
    /// # Errors
    /// `TrainingConflict` if another sample in the session is still in progress,
    /// locally or on the service.
    pub async fn start(&self, headset_id: &str, action: &str) -> CortexResult<()> {
        let result = self.start_inner(headset_id, action).await;
        self.surface(Methods::TRAINING, result)
    }

    async fn start_inner(&self, headset_id: &str, action: &str) -> CortexResult<()> {
        let token = self.ctx.auth.token("start training")?;
        let (session_id, event) = self.ctx.sessions.with_training(headset_id, |ids, tracker| {
            tracker.check_start(&ids.session_id, action)?;
            Ok::<_, CortexError>((
                ids.session_id.clone(),
                tracker
                    .apply(action, TrainingSignal::Started)
                    .map(|t| t.into_event(&ids.session_id, &ids.headset_id)),
            ))
        })??;
        self.publish(event);

        let sent = self
            .training_rpc(&token, &session_id, TrainingStatus::Start, action)
            .await;
        if sent.is_err() {
            let rolled_back = self
                .ctx
                .sessions
                .with_training(headset_id, |ids, tracker| {
                    tracker
                        .abort_start(action)
                        .map(|t| t.into_event(&ids.session_id, &ids.headset_id))
                })
                .ok()
                .flatten();
            self.publish(rolled_back);
        }
        sent.map_err(|e| remote_conflict(e, &session_id, action))
    }

    /// Keep the last sample of `action`. Valid only after it succeeded.
    pub async fn accept(&self, headset_id: &str, action: &str) -> CortexResult<()> {
        let result = self
            .decide(headset_id, action, TrainingStatus::Accept, TrainingSignal::Completed)
            .await;
        self.surface(Methods::TRAINING, result)
    }

    /// Discard the last sample of `action`. Valid only after it succeeded.
    pub async fn reject(&self, headset_id: &str, action: &str) -> CortexResult<()> {
        let result = self
            .decide(headset_id, action, TrainingStatus::Reject, TrainingSignal::Rejected)
            .await;
        self.surface(Methods::TRAINING, result)
    }

    async fn decide(
        &self,
        headset_id: &str,
        action: &str,
        status: TrainingStatus,
        signal: TrainingSignal,
    ) -> CortexResult<()> {
        let token = self.ctx.auth.token(status.as_str())?;
        let session_id = self.ctx.sessions.with_training(headset_id, |ids, tracker| {
            tracker.check_decision(action, status.as_str())?;
            Ok::<_, CortexError>(ids.session_id.clone())
        })??;

        self.training_rpc(&token, &session_id, status, action).await?;
        self.apply(headset_id, action, signal);
        Ok(())
    }

    /// Cancel the sample in progress and return `action` to idle.
    pub async fn reset(&self, headset_id: &str, action: &str) -> CortexResult<()> {
        let result = self
            .unconditional(headset_id, action, TrainingStatus::Reset, TrainingSignal::Reset)
            .await;
        self.surface(Methods::TRAINING, result)
    }

    /// Erase every trained sample of `action` from the loaded profile.
    pub async fn erase(&self, headset_id: &str, action: &str) -> CortexResult<()> {
        let result = self
            .unconditional(
                headset_id,
                action,
                TrainingStatus::Erase,
                TrainingSignal::DataErased,
            )
            .await;
        self.surface(Methods::TRAINING, result)
    }

    async fn unconditional(
        &self,
        headset_id: &str,
        action: &str,
        status: TrainingStatus,
        signal: TrainingSignal,
    ) -> CortexResult<()> {
        let token = self.ctx.auth.token(status.as_str())?;
        let session_id = self.session_id(headset_id)?;
        self.training_rpc(&token, &session_id, status, action).await?;
        self.apply(headset_id, action, signal);
        Ok(())
    }

    /// Stage of `action` in the headset's session.
    pub fn stage(&self, headset_id: &str, action: &str) -> CortexResult<TrainingStage> {
        self.ctx
            .sessions
            .with_training(headset_id, |_, tracker| tracker.stage(action))
    }

    /// Round counters for the headset's session.
    pub fn progress(&self, headset_id: &str) -> CortexResult<TrainingProgress> {
        self.ctx
            .sessions
            .with_training(headset_id, |_, tracker| tracker.progress())
    }

    /// Actions, controls and events supported by a detection.
    pub async fn detection_info(&self, detection: DetectionType) -> CortexResult<DetectionInfo> {
        let result = self
            .ctx
            .rpc
            .call_as(
                Methods::GET_DETECTION_INFO,
                json!({ "detection": detection.as_str() }),
            )
            .await;
        self.surface(Methods::GET_DETECTION_INFO, result)
    }

    /// Duration of the last training sample in the headset's session.
    pub async fn training_time(&self, headset_id: &str) -> CortexResult<TrainingTime> {
        let result: CortexResult<TrainingTime> = async {
            let token = self.ctx.auth.token(Methods::GET_TRAINING_TIME)?;
            let session_id = self.session_id(headset_id)?;
            self.ctx
                .rpc
                .call_as(
                    Methods::GET_TRAINING_TIME,
                    json!({
                        "cortexToken": token,
                        "detection": DetectionType::MentalCommand.as_str(),
                        "session": session_id,
                    }),
                )
                .await
        }
        .await;
        self.surface(Methods::GET_TRAINING_TIME, result)
    }

    /// Actions trained in a profile or live session, with sample counts.
    pub async fn trained_signature_actions(
        &self,
        target: &DetectionTarget,
    ) -> CortexResult<TrainedSignatureActions> {
        let result = self
            .targeted(
                Methods::GET_TRAINED_SIGNATURE_ACTIONS,
                target,
                Map::from_iter([(
                    "detection".to_string(),
                    Value::from(DetectionType::MentalCommand.as_str()),
                )]),
            )
            .await;
        self.surface(Methods::GET_TRAINED_SIGNATURE_ACTIONS, result)
    }

    /// Score threshold a sample must reach, and the last sample's score.
    pub async fn training_threshold(
        &self,
        target: &DetectionTarget,
    ) -> CortexResult<TrainingThreshold> {
        let result = self
            .targeted(Methods::MENTAL_COMMAND_TRAINING_THRESHOLD, target, Map::new())
            .await;
        self.surface(Methods::MENTAL_COMMAND_TRAINING_THRESHOLD, result)
    }

    /// Sensitivity of each active action, in active-action order.
    pub async fn action_sensitivity(&self, target: &DetectionTarget) -> CortexResult<Vec<i32>> {
        let result = self
            .targeted(
                Methods::MENTAL_COMMAND_ACTION_SENSITIVITY,
                target,
                Map::from_iter([("status".to_string(), Value::from("get"))]),
            )
            .await;
        self.surface(Methods::MENTAL_COMMAND_ACTION_SENSITIVITY, result)
    }

    /// Set the sensitivity of each active action (1–10).
    pub async fn set_action_sensitivity(
        &self,
        target: &DetectionTarget,
        values: &[i32],
    ) -> CortexResult<()> {
        let result = self
            .targeted::<Value>(
                Methods::MENTAL_COMMAND_ACTION_SENSITIVITY,
                target,
                Map::from_iter([
                    ("status".to_string(), Value::from("set")),
                    ("values".to_string(), json!(values)),
                ]),
            )
            .await
            .map(drop);
        self.surface(Methods::MENTAL_COMMAND_ACTION_SENSITIVITY, result)
    }

    /// Actions the detection currently recognizes.
    pub async fn active_actions(&self, target: &DetectionTarget) -> CortexResult<Vec<String>> {
        let result = self
            .targeted(
                Methods::MENTAL_COMMAND_ACTIVE_ACTION,
                target,
                Map::from_iter([("status".to_string(), Value::from("get"))]),
            )
            .await;
        self.surface(Methods::MENTAL_COMMAND_ACTIVE_ACTION, result)
    }

    /// Choose the actions the detection recognizes.
    pub async fn set_active_actions(
        &self,
        target: &DetectionTarget,
        actions: &[&str],
    ) -> CortexResult<()> {
        let result = self
            .targeted::<Value>(
                Methods::MENTAL_COMMAND_ACTIVE_ACTION,
                target,
                Map::from_iter([
                    ("status".to_string(), Value::from("set")),
                    ("actions".to_string(), json!(actions)),
                ]),
            )
            .await
            .map(drop);
        self.surface(Methods::MENTAL_COMMAND_ACTIVE_ACTION, result)
    }

    // ─── helpers ────────────────────────────────────────────────────────

    async fn training_rpc(
        &self,
        token: &str,
        session_id: &str,
        status: TrainingStatus,
        action: &str,
    ) -> CortexResult<()> {
        self.ctx
            .rpc
            .call(
                Methods::TRAINING,
                json!({
                    "cortexToken": token,
                    "session": session_id,
                    "detection": DetectionType::MentalCommand.as_str(),
                    "status": status.as_str(),
                    "action": action,
                }),
            )
            .await?;
        tracing::info!(session_id, action, status = status.as_str(), "Training request accepted");
        Ok(())
    }

    async fn targeted<T: serde::de::DeserializeOwned>(
        &self,
        method: &'static str,
        target: &DetectionTarget,
        mut params: Map<String, Value>,
    ) -> CortexResult<T> {
        let token = self.ctx.auth.token(method)?;
        params.insert("cortexToken".into(), token.into());
        target.apply(&mut params);
        self.ctx.rpc.call_as(method, Value::Object(params)).await
    }

    fn session_id(&self, headset_id: &str) -> CortexResult<String> {
        self.ctx
            .sessions
            .with_training(headset_id, |ids, _| ids.session_id.clone())
    }

    fn apply(&self, headset_id: &str, action: &str, signal: TrainingSignal) {
        let event = self
            .ctx
            .sessions
            .with_training(headset_id, |ids, tracker| {
                tracker
                    .apply(action, signal)
                    .map(|t| t.into_event(&ids.session_id, &ids.headset_id))
            })
            .ok()
            .flatten();
        self.publish(event);
    }

    fn publish(&self, event: Option<TrainingEvent>) {
        if let Some(event) = event {
            tracing::debug!(action = %event.action, stage = %event.stage, "Training stage changed");
            self.ctx.hub.emit(EngineEvent::Training(event));
        }
    }

    fn surface<T>(&self, method: &str, result: CortexResult<T>) -> CortexResult<T> {
        if let Err(e) = &result {
            self.ctx.hub.report(method, e);
        }
        result
    }
}

/// A `start` the service refused for a reason other than a known session,
/// headset or authorization failure is a sample already running remotely.
fn remote_conflict(error: CortexError, session_id: &str, requested: &str) -> CortexError {
    match error.api_kind() {
        Some(ApiErrorKind::Other) => {
            tracing::warn!(session_id, requested, %error, "Service refused training start");
            CortexError::TrainingConflict {
                session_id: session_id.to_string(),
                active: UNKNOWN_ACTION.to_string(),
                requested: requested.to_string(),
            }
        }
        _ => error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TrainingTracker {
        TrainingTracker::new(&TrainingConfig {
            feedback_rounds: 2,
            min_rounds: 3,
            max_rounds: 4,
        })
    }

    fn run_sample(tracker: &mut TrainingTracker, action: &str, accept: bool) {
        tracker.apply(action, TrainingSignal::Started).unwrap();
        tracker.apply(action, TrainingSignal::Succeeded).unwrap();
        let last = if accept {
            TrainingSignal::Completed
        } else {
            TrainingSignal::Rejected
        };
        tracker.apply(action, last).unwrap();
    }

    fn sys(code: &str) -> SystemEvent {
        SystemEvent {
            timestamp: 0.0,
            detection: "mentalCommand".into(),
            code: SystemEventCode::parse(code),
            message: code.into(),
        }
    }

    #[test]
    fn test_happy_path_stages() {
        let mut t = tracker();
        assert_eq!(t.stage("push"), TrainingStage::Idle);
        t.apply("push", TrainingSignal::Started).unwrap();
        assert_eq!(t.stage("push"), TrainingStage::Started);
        t.apply("push", TrainingSignal::Succeeded).unwrap();
        assert!(t.stage("push").is_busy());
        let transition = t.apply("push", TrainingSignal::Completed).unwrap();
        assert_eq!(transition.stage, TrainingStage::Completed);
        assert_eq!(t.times_completed("push"), 1);
    }

    #[test]
    fn test_failure_returns_to_idle() {
        let mut t = tracker();
        t.apply("push", TrainingSignal::Started);
        let transition = t.apply("push", TrainingSignal::Failed).unwrap();
        assert_eq!(transition.stage, TrainingStage::Failed);
        assert_eq!(t.stage("push"), TrainingStage::Idle);
        assert!(t.check_start("s", "push").is_ok());
    }

    #[test]
    fn test_start_while_busy_conflicts() {
        let mut t = tracker();
        t.apply("neutral", TrainingSignal::Started);
        match t.check_start("s-1", "push") {
            Err(CortexError::TrainingConflict { active, requested, .. }) => {
                assert_eq!(active, "neutral");
                assert_eq!(requested, "push");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert!(t.check_start("s-1", "neutral").is_err());

        t.apply("neutral", TrainingSignal::Succeeded);
        assert!(t.check_start("s-1", "push").is_err());
        t.apply("neutral", TrainingSignal::Rejected);
        assert!(t.check_start("s-1", "push").is_ok());
    }

    #[test]
    fn test_decision_requires_succeeded() {
        let mut t = tracker();
        assert!(matches!(
            t.check_decision("push", "accept"),
            Err(CortexError::InvalidState { .. })
        ));
        t.apply("push", TrainingSignal::Started);
        assert!(t.check_decision("push", "accept").is_err());
        t.apply("push", TrainingSignal::Succeeded);
        assert!(t.check_decision("push", "accept").is_ok());
    }

    #[test]
    fn test_rpc_and_sys_event_apply_once() {
        let mut t = tracker();
        assert!(t.apply("push", TrainingSignal::Started).is_some());
        assert!(t.apply_system_event(&sys("MC_Started")).is_none());
        assert!(t.apply_system_event(&sys("MC_Succeeded")).is_some());
        assert!(t.apply_system_event(&sys("MC_Completed")).is_some());
        assert!(t.apply("push", TrainingSignal::Completed).is_none());
        assert_eq!(t.times_completed("push"), 1);
    }

    #[test]
    fn test_round_needs_neutral_and_action() {
        let mut t = tracker();
        run_sample(&mut t, "push", true);
        assert_eq!(t.rounds_trained(), 0);
        run_sample(&mut t, "push", true);
        assert_eq!(t.rounds_trained(), 0);
        run_sample(&mut t, NEUTRAL_ACTION, true);
        assert_eq!(t.rounds_trained(), 1);
    }

    #[test]
    fn test_reject_never_counts() {
        let mut t = tracker();
        run_sample(&mut t, NEUTRAL_ACTION, false);
        run_sample(&mut t, "push", false);
        assert_eq!(t.rounds_trained(), 0);
        assert_eq!(t.times_completed("push"), 0);
    }

    #[test]
    fn test_feedback_and_finish_gates() {
        let mut t = tracker();
        for round in 1..=4 {
            run_sample(&mut t, NEUTRAL_ACTION, true);
            run_sample(&mut t, "push", true);
            assert_eq!(t.rounds_trained(), round);
        }
        let progress = t.progress();
        assert!(progress.feedback_enabled);
        assert!(progress.can_finish);
        assert!((progress.fraction - 1.0).abs() < f64::EPSILON);

        let mut t = tracker();
        run_sample(&mut t, NEUTRAL_ACTION, true);
        run_sample(&mut t, "push", true);
        assert!(!t.feedback_enabled());
        assert!((t.progress().fraction - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_forces_idle_once() {
        let mut t = tracker();
        t.apply("push", TrainingSignal::Started);
        assert!(t.apply("push", TrainingSignal::Reset).is_some());
        assert_eq!(t.stage("push"), TrainingStage::Idle);
        assert!(t.apply_system_event(&sys("MC_Reset")).is_none());
    }

    #[test]
    fn test_erase_clears_counts_in_any_stage() {
        let mut t = tracker();
        run_sample(&mut t, "push", true);
        run_sample(&mut t, "push", true);
        assert_eq!(t.times_completed("push"), 2);

        let transition = t.apply("push", TrainingSignal::DataErased).unwrap();
        assert_eq!(transition.stage, TrainingStage::Idle);
        assert_eq!(t.times_completed("push"), 0);
        assert!(t.apply_system_event(&sys("MC_DataErased")).is_none());
    }

    #[test]
    fn test_erase_discards_rounds() {
        let mut t = tracker();
        run_sample(&mut t, NEUTRAL_ACTION, true);
        run_sample(&mut t, "push", true);
        assert_eq!(t.rounds_trained(), 1);
        t.apply(NEUTRAL_ACTION, TrainingSignal::DataErased).unwrap();
        t.apply("push", TrainingSignal::DataErased).unwrap();
        assert_eq!(t.rounds_trained(), 0);
        assert!(!t.progress().can_finish);

        let mut t = tracker();
        run_sample(&mut t, NEUTRAL_ACTION, true);
        t.apply(NEUTRAL_ACTION, TrainingSignal::DataErased).unwrap();
        run_sample(&mut t, "push", true);
        assert_eq!(t.rounds_trained(), 0);
        run_sample(&mut t, NEUTRAL_ACTION, true);
        assert_eq!(t.rounds_trained(), 1);

        let mut t = tracker();
        run_sample(&mut t, "push", true);
        t.apply("push", TrainingSignal::DataErased).unwrap();
        run_sample(&mut t, NEUTRAL_ACTION, true);
        assert_eq!(t.rounds_trained(), 0);
    }

    #[test]
    fn test_remote_start_refusal_is_conflict() {
        let refused = CortexError::rpc(Methods::TRAINING, -32300, "Training is in progress");
        match remote_conflict(refused, "s-1", "push") {
            CortexError::TrainingConflict {
                session_id,
                active,
                requested,
            } => {
                assert_eq!(session_id, "s-1");
                assert_eq!(active, UNKNOWN_ACTION);
                assert_eq!(requested, "push");
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let unavailable = CortexError::rpc(Methods::TRAINING, -32004, "Headset is unavailable");
        assert!(matches!(
            remote_conflict(unavailable, "s-1", "push"),
            CortexError::Rpc { code: -32004, .. }
        ));
        let timeout = CortexError::Timeout {
            method: Methods::TRAINING.into(),
            seconds: 2,
        };
        assert!(matches!(
            remote_conflict(timeout, "s-1", "push"),
            CortexError::Timeout { .. }
        ));
    }

    #[test]
    fn test_abort_start_rolls_back() {
        let mut t = tracker();
        t.apply("push", TrainingSignal::Started);
        assert!(t.abort_start("push").is_some());
        assert_eq!(t.stage("push"), TrainingStage::Idle);
        assert!(t.abort_start("push").is_none());
    }

    #[test]
    fn test_sys_events_ignored_without_action() {
        let mut t = tracker();
        assert!(t.apply_system_event(&sys("MC_Succeeded")).is_none());

        let mut facial = sys("FE_Started");
        facial.detection = "facialExpression".into();
        t.apply("push", TrainingSignal::Started);
        assert!(t.apply_system_event(&facial).is_none());
    }
}
