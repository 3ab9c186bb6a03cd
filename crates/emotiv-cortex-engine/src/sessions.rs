//! # Sessions
//!
//! Owns the headset → session mapping and everything scoped to a session:
//! the stream decoders, the per-channel subscriber topics, and the training
//! tracker.
//!
//! All of it lives in one table behind one lock, so the session map and the
//! headset index can never disagree. The lock is never held across `.await`,
//! and events produced under it are published after it is released.
//!
//! Removing a session from the table is the single point where a session
//! ends. Whoever removes it (explicit close, the unsolicited stream-stop
//! warning, or connection loss) emits `StreamEnded`; everyone else finds
//! nothing to remove.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::json;

use crate::config::TrainingConfig;
use crate::engine::EngineContext;
use crate::error::{CortexError, CortexResult};
use crate::events::{EngineEvent, Subscription};
use crate::lock;
use crate::parser::{ChannelData, DeviceInfo, SessionStreams};
use crate::protocol::constants::Methods;
use crate::protocol::session::{SessionInfo, SubscribeResult};
use crate::protocol::streams::{Channel, StreamFrame};
use crate::training::{TrainingEvent, TrainingTracker};

/// Identity of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIds {
    pub session_id: String,
    pub headset_id: String,
}

/// Snapshot of a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: String,
    pub headset_id: String,
    pub subscriptions: BTreeSet<Channel>,
    pub created_at: Instant,
    /// Whether the first data frame has arrived.
    pub streaming: bool,
}

/// Outcome of [`CortexEngine::start_session`](crate::CortexEngine::start_session).
#[derive(Debug)]
pub struct SessionStart {
    pub session_id: String,
    pub headset_id: String,
    /// Channels the service accepted.
    pub subscribed: Vec<Channel>,
    /// One `PartialSubscriptionFailure` per refused channel.
    pub failures: Vec<CortexError>,
}

/// Outcome of a remote subscribe on a live session.
#[derive(Debug, Default)]
pub struct SubscribeOutcome {
    pub subscribed: Vec<Channel>,
    pub failures: Vec<CortexError>,
}

struct Session {
    ids: SessionIds,
    subscriptions: BTreeSet<Channel>,
    created_at: Instant,
    order: u64,
    started: bool,
    streams: SessionStreams,
    training: TrainingTracker,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, Session>,
    by_headset: HashMap<String, String>,
    /// Headsets with a `createSession` in flight.
    pending: HashSet<String>,
    next_order: u64,
    /// Bumped by `invalidate_all`; in-flight starts from an older generation are discarded.
    generation: u64,
}

impl SessionTable {
    fn take(&mut self, session_id: &str) -> Option<Session> {
        let session = self.sessions.remove(session_id)?;
        self.by_headset.remove(&session.ids.headset_id);
        Some(session)
    }
}

/// A session that just left the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EndedSession {
    pub(crate) ids: SessionIds,
    pub(crate) started: bool,
}

/// Side effects of routing one frame.
#[derive(Debug, Default)]
pub(crate) struct Routed {
    /// Headset whose session delivered its first frame.
    pub(crate) started: Option<String>,
    pub(crate) training: Option<TrainingEvent>,
}

pub(crate) struct SessionManager {
    table: Mutex<SessionTable>,
    training: TrainingConfig,
}

impl SessionManager {
    pub(crate) fn new(training: TrainingConfig) -> Self {
        Self {
            table: Mutex::new(SessionTable::default()),
            training,
        }
    }

    /// Claim `headset_id` for a start. Returns the current generation.
    pub(crate) fn reserve(&self, headset_id: &str) -> CortexResult<u64> {
        let mut table = lock(&self.table);
        if table.by_headset.contains_key(headset_id) || table.pending.contains(headset_id) {
            return Err(CortexError::AlreadyInUse {
                headset_id: headset_id.to_string(),
            });
        }
        table.pending.insert(headset_id.to_string());
        Ok(table.generation)
    }

    /// Drop a reservation whose start failed.
    pub(crate) fn release(&self, headset_id: &str) {
        lock(&self.table).pending.remove(headset_id);
    }

    /// Turn a reservation into a session, unless the table was invalidated meanwhile.
    pub(crate) fn insert(
        &self,
        generation: u64,
        headset_id: &str,
        session_id: &str,
    ) -> CortexResult<()> {
        let mut table = lock(&self.table);
        table.pending.remove(headset_id);
        if table.generation != generation {
            return Err(CortexError::ConnectionLost {
                reason: format!("connection reset while starting a session for {headset_id}"),
            });
        }

        let order = table.next_order;
        table.next_order += 1;
        table
            .by_headset
            .insert(headset_id.to_string(), session_id.to_string());
        table.sessions.insert(
            session_id.to_string(),
            Session {
                ids: SessionIds {
                    session_id: session_id.to_string(),
                    headset_id: headset_id.to_string(),
                },
                subscriptions: BTreeSet::new(),
                created_at: Instant::now(),
                order,
                started: false,
                streams: SessionStreams::new(),
                training: TrainingTracker::new(&self.training),
            },
        );
        Ok(())
    }

    /// Record the accepted channels of a subscribe result. `false` if the session is gone.
    pub(crate) fn activate(&self, session_id: &str, result: &SubscribeResult) -> bool {
        let mut table = lock(&self.table);
        let Some(session) = table.sessions.get_mut(session_id) else {
            return false;
        };
        for success in &result.success {
            let Some(channel) = Channel::from_name(&success.stream_name) else {
                tracing::debug!(stream = %success.stream_name, "Subscribed to a stream the engine does not decode");
                continue;
            };
            if channel == Channel::DeviceInfo {
                match success.nested_cols(2) {
                    Some(headers) => session.streams.configure_device_headers(headers),
                    None => tracing::warn!(
                        session_id,
                        "dev subscription carried no contact-quality headers"
                    ),
                }
            }
            session.subscriptions.insert(channel);
        }
        true
    }

    /// Forget channels the service unsubscribed.
    pub(crate) fn deactivate(&self, session_id: &str, channels: &[Channel]) {
        if let Some(session) = lock(&self.table).sessions.get_mut(session_id) {
            for channel in channels {
                session.subscriptions.remove(channel);
            }
        }
    }

    pub(crate) fn remove(&self, session_id: &str) -> Option<EndedSession> {
        let session = lock(&self.table).take(session_id)?;
        Some(EndedSession {
            ids: session.ids,
            started: session.started,
        })
    }

    /// Session id of the most recently inserted session.
    pub(crate) fn most_recent(&self) -> Option<String> {
        lock(&self.table)
            .sessions
            .values()
            .max_by_key(|session| session.order)
            .map(|session| session.ids.session_id.clone())
    }

    /// End every session and discard in-flight starts.
    pub(crate) fn invalidate_all(&self) -> Vec<EndedSession> {
        let drained: Vec<Session> = {
            let mut table = lock(&self.table);
            table.generation += 1;
            table.pending.clear();
            table.by_headset.clear();
            table.sessions.drain().map(|(_, session)| session).collect()
        };
        drained
            .into_iter()
            .map(|session| EndedSession {
                ids: session.ids,
                started: session.started,
            })
            .collect()
    }

    /// Decode `frame` into its session's topics.
    pub(crate) fn route(&self, frame: &StreamFrame) -> Routed {
        let mut table = lock(&self.table);
        let Some(session) = table.sessions.get_mut(&frame.session_id) else {
            tracing::warn!(
                session_id = %frame.session_id,
                channel = %frame.channel,
                "Dropping frame for unknown session"
            );
            return Routed::default();
        };

        let mut routed = Routed::default();
        if !session.started {
            session.started = true;
            routed.started = Some(session.ids.headset_id.clone());
        }
        if let Some(event) = session.streams.dispatch(frame) {
            routed.training = session
                .training
                .apply_system_event(&event)
                .map(|t| t.into_event(&session.ids.session_id, &session.ids.headset_id));
        }
        routed
    }

    pub(crate) fn session_for_headset(&self, headset_id: &str) -> Option<String> {
        lock(&self.table).by_headset.get(headset_id).cloned()
    }

    pub(crate) fn has_data_stream(&self, headset_id: &str) -> bool {
        let table = lock(&self.table);
        table
            .by_headset
            .get(headset_id)
            .and_then(|id| table.sessions.get(id))
            .is_some_and(|session| session.started)
    }

    pub(crate) fn summaries(&self) -> Vec<SessionSummary> {
        let table = lock(&self.table);
        let mut sessions: Vec<&Session> = table.sessions.values().collect();
        sessions.sort_by_key(|session| session.order);
        sessions
            .into_iter()
            .map(|session| SessionSummary {
                session_id: session.ids.session_id.clone(),
                headset_id: session.ids.headset_id.clone(),
                subscriptions: session.subscriptions.clone(),
                created_at: session.created_at,
                streaming: session.started,
            })
            .collect()
    }

    pub(crate) fn subscribe<T: ChannelData>(&self, headset_id: &str) -> CortexResult<Subscription<T>> {
        self.with_session(headset_id, |session| T::subscribe(&session.streams))
    }

    pub(crate) fn device_info(&self, headset_id: &str) -> CortexResult<Option<DeviceInfo>> {
        self.with_session(headset_id, |session| session.streams.latest_device_info())
    }

    pub(crate) fn session_ids(&self, headset_id: &str) -> CortexResult<SessionIds> {
        self.with_session(headset_id, |session| session.ids.clone())
    }

    /// Run `f` on the training tracker of the headset's session.
    pub(crate) fn with_training<R>(
        &self,
        headset_id: &str,
        f: impl FnOnce(&SessionIds, &mut TrainingTracker) -> R,
    ) -> CortexResult<R> {
        self.with_session(headset_id, |session| f(&session.ids, &mut session.training))
    }

    fn with_session<R>(
        &self,
        headset_id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> CortexResult<R> {
        let mut table = lock(&self.table);
        let session = table
            .by_headset
            .get(headset_id)
            .cloned()
            .and_then(|id| table.sessions.get_mut(&id))
            .ok_or_else(|| CortexError::NotFound {
                kind: "session for headset",
                id: headset_id.to_string(),
            })?;
        Ok(f(session))
    }
}

// ─── Flows ──────────────────────────────────────────────────────────────

/// Create a session on `headset_id` and subscribe the default channels.
pub(crate) async fn start_session(ctx: &EngineContext, headset_id: &str) -> CortexResult<SessionStart> {
    let token = ctx.auth.token("start a session")?;
    let generation = ctx.sessions.reserve(headset_id)?;

    let created: CortexResult<SessionInfo> = ctx
        .rpc
        .call_as(
            Methods::CREATE_SESSION,
            json!({
                "cortexToken": token,
                "headset": headset_id,
                "status": "active",
            }),
        )
        .await;
    let info = match created {
        Ok(info) => info,
        Err(e) => {
            ctx.sessions.release(headset_id);
            return Err(e);
        }
    };
    ctx.sessions.insert(generation, headset_id, &info.id)?;
    tracing::info!(session_id = %info.id, headset_id, "Session created");

    let channels = ctx.config.session.default_streams.clone();
    match subscribe_on(ctx, &token, &info.id, &channels).await {
        Ok(outcome) => Ok(SessionStart {
            session_id: info.id,
            headset_id: headset_id.to_string(),
            subscribed: outcome.subscribed,
            failures: outcome.failures,
        }),
        Err(e) => {
            tracing::warn!(session_id = %info.id, "Subscribe failed; closing the new session");
            let _ = close_session(ctx, &info.id).await;
            Err(e)
        }
    }
}

/// Subscribe additional channels on the headset's live session.
pub(crate) async fn subscribe_channels(
    ctx: &EngineContext,
    headset_id: &str,
    channels: &[Channel],
) -> CortexResult<SubscribeOutcome> {
    let token = ctx.auth.token("subscribe")?;
    let ids = ctx.sessions.session_ids(headset_id)?;
    subscribe_on(ctx, &token, &ids.session_id, channels).await
}

async fn subscribe_on(
    ctx: &EngineContext,
    token: &str,
    session_id: &str,
    channels: &[Channel],
) -> CortexResult<SubscribeOutcome> {
    let streams: Vec<&str> = channels.iter().map(|c| c.as_str()).collect();
    let result: SubscribeResult = ctx
        .rpc
        .call_as(
            Methods::SUBSCRIBE,
            json!({
                "cortexToken": token,
                "session": session_id,
                "streams": streams,
            }),
        )
        .await?;

    if !ctx.sessions.activate(session_id, &result) {
        return Err(CortexError::NotFound {
            kind: "session",
            id: session_id.to_string(),
        });
    }

    let subscribed: Vec<Channel> = result
        .success
        .iter()
        .filter_map(|s| Channel::from_name(&s.stream_name))
        .collect();
    let failures: Vec<CortexError> = result
        .failure
        .into_iter()
        .map(|failure| CortexError::PartialSubscriptionFailure {
            session_id: session_id.to_string(),
            channel: failure.stream_name,
            code: failure.code,
            message: failure.message,
        })
        .collect();

    for failure in &failures {
        ctx.hub.report(Methods::SUBSCRIBE, failure);
    }
    tracing::info!(session_id, subscribed = ?subscribed, failed = failures.len(), "Subscribed");
    Ok(SubscribeOutcome {
        subscribed,
        failures,
    })
}

/// Unsubscribe channels from the headset's live session.
pub(crate) async fn unsubscribe_channels(
    ctx: &EngineContext,
    headset_id: &str,
    channels: &[Channel],
) -> CortexResult<()> {
    let token = ctx.auth.token("unsubscribe")?;
    let ids = ctx.sessions.session_ids(headset_id)?;
    let streams: Vec<&str> = channels.iter().map(|c| c.as_str()).collect();
    let result: SubscribeResult = ctx
        .rpc
        .call_as(
            Methods::UNSUBSCRIBE,
            json!({
                "cortexToken": token,
                "session": ids.session_id,
                "streams": streams,
            }),
        )
        .await?;

    let removed: Vec<Channel> = result
        .success
        .iter()
        .filter_map(|s| Channel::from_name(&s.stream_name))
        .collect();
    ctx.sessions.deactivate(&ids.session_id, &removed);
    for failure in result.failure {
        tracing::warn!(
            session_id = %ids.session_id,
            stream = %failure.stream_name,
            code = failure.code,
            "Unsubscribe refused: {}",
            failure.message
        );
    }
    Ok(())
}

/// Close `session_id`. Unknown sessions are a no-op.
///
/// The session is removed locally before the close request is sent, so a
/// failed request still leaves the engine consistent; its error is returned.
pub(crate) async fn close_session(ctx: &EngineContext, session_id: &str) -> CortexResult<()> {
    let Some(ended) = ctx.sessions.remove(session_id) else {
        tracing::debug!(session_id, "Close requested for unknown session");
        return Ok(());
    };
    announce_end(ctx, &ended);

    let token = match ctx.auth.token("close a session") {
        Ok(token) => token,
        Err(_) => {
            tracing::debug!(session_id, "Not authorized; skipping remote close");
            return Ok(());
        }
    };
    ctx.rpc
        .call(
            Methods::UPDATE_SESSION,
            json!({
                "cortexToken": token,
                "session": session_id,
                "status": "close",
            }),
        )
        .await?;
    tracing::info!(session_id, headset_id = %ended.ids.headset_id, "Session closed");
    Ok(())
}

pub(crate) async fn close_session_by_headset(ctx: &EngineContext, headset_id: &str) -> CortexResult<()> {
    match ctx.sessions.session_for_headset(headset_id) {
        Some(session_id) => close_session(ctx, &session_id).await,
        None => Ok(()),
    }
}

pub(crate) async fn close_most_recent(ctx: &EngineContext) -> CortexResult<()> {
    match ctx.sessions.most_recent() {
        Some(session_id) => close_session(ctx, &session_id).await,
        None => Ok(()),
    }
}

/// The service stopped `session_id` on its own.
pub(crate) fn on_stream_stop(ctx: &EngineContext, session_id: &str) {
    match ctx.sessions.remove(session_id) {
        Some(ended) => {
            tracing::info!(session_id, headset_id = %ended.ids.headset_id, "Session stopped by Cortex");
            announce_end(ctx, &ended);
        }
        None => tracing::debug!(session_id, "Stop notice for a session already gone"),
    }
}

/// End every session locally.
pub(crate) fn end_all(ctx: &EngineContext) {
    for ended in ctx.sessions.invalidate_all() {
        tracing::info!(session_id = %ended.ids.session_id, "Session invalidated");
        announce_end(ctx, &ended);
    }
}

/// Publish the side effects of routing a frame.
pub(crate) fn route_frame(ctx: &EngineContext, frame: &StreamFrame) {
    let routed = ctx.sessions.route(frame);
    if let Some(headset_id) = routed.started {
        tracing::info!(session_id = %frame.session_id, %headset_id, "Data stream started");
        ctx.hub.emit(EngineEvent::StreamStarted(headset_id));
    }
    if let Some(event) = routed.training {
        ctx.hub.emit(EngineEvent::Training(event));
    }
}

fn announce_end(ctx: &EngineContext, ended: &EndedSession) {
    if ended.started {
        ctx.hub
            .emit(EngineEvent::StreamEnded(ended.ids.headset_id.clone()));
    }
}
