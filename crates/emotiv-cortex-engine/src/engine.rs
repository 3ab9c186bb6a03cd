//! # Engine
//!
//! [`CortexEngine`] is the one object a host holds. It owns every component
//! and a supervisor task that keeps the connection alive:
//!
//! ```text
//! start() ─► connect ─► handshake ─► dispatch loop ──► connection lost
//!              ▲  │                                         │
//!              │  └─ failed: EmotivAppNotFound              │
//!              └────────────── backoff ◄────────────────────┘
//! ```
//!
//! The dispatch loop owns the inbound side of the transport. It resolves
//! responses, routes stream frames to sessions and reacts to warnings, in
//! arrival order. Anything that needs its own RPC (the handshake, headset
//! re-queries) runs as a background task so the loop never waits on itself.
//!
//! Losing the connection fails every pending request, ends every session,
//! and returns the authorizer to `ServiceConnecting`. Session and training
//! operations fail with `InvalidState` until the handshake completes again.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};

use crate::authorizer::{self, Authorizer, ConnectionState};
use crate::config::CortexConfig;
use crate::correlator::Correlator;
use crate::error::{CortexError, CortexResult};
use crate::events::{EngineEvent, ErrorEvent, EventHub, EventPump, Subscription};
use crate::headsets::{self, Headset, HeadsetFinder};
use crate::lock;
use crate::parser::{ChannelData, DeviceInfo};
use crate::profiles::ProfileManager;
use crate::protocol::auth::LicenseInfo;
use crate::protocol::constants::WarningCodes;
use crate::protocol::headset::DeviceCommand;
use crate::protocol::rpc::{Inbound, Warning};
use crate::protocol::streams::Channel;
use crate::reconnect::Backoff;
use crate::sessions::{self, SessionManager, SessionStart, SessionSummary, SubscribeOutcome};
use crate::training::Trainer;
use crate::transport::{SharedTransportState, Transport, TransportEvent, TransportState};

/// How often pending requests are checked against the RPC timeout.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Components shared by the public API and the supervisor.
pub(crate) struct EngineContext {
    pub(crate) config: CortexConfig,
    pub(crate) rpc: Correlator,
    pub(crate) auth: Authorizer,
    pub(crate) sessions: SessionManager,
    pub(crate) headsets: HeadsetFinder,
    pub(crate) hub: EventHub,
    pub(crate) transport_state: SharedTransportState,
}

impl EngineContext {
    pub(crate) fn new(config: CortexConfig) -> Self {
        Self {
            rpc: Correlator::new(Duration::from_secs(config.timeouts.rpc_timeout_secs)),
            auth: Authorizer::new(),
            sessions: SessionManager::new(config.training.clone()),
            headsets: HeadsetFinder::new(),
            hub: EventHub::default(),
            transport_state: Arc::new(Mutex::new(TransportState::Disconnected)),
            config,
        }
    }

    /// Publish `result`'s error, if any, and pass it through.
    fn surface<T>(&self, operation: &str, result: CortexResult<T>) -> CortexResult<T> {
        if let Err(e) = &result {
            self.hub.report(operation, e);
        }
        result
    }
}

struct Supervisor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// A connection to the Cortex service with its sessions, streams and training.
///
/// ```no_run
/// use emotiv_cortex_engine::{CortexConfig, CortexEngine, MentalCommand};
///
/// # async fn run() -> emotiv_cortex_engine::CortexResult<()> {
/// let engine = CortexEngine::new(CortexConfig::discover(None)?)?;
/// engine.start()?;
///
/// let headsets = engine.query_headsets().await?;
/// let headset_id = &headsets[0].id;
/// engine.start_session(headset_id).await?;
///
/// let mut commands = engine.subscribe::<MentalCommand>(headset_id)?;
/// while let Some(command) = commands.recv().await {
///     println!("{} {:.2}", command.action, command.power);
/// }
/// engine.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct CortexEngine {
    ctx: Arc<EngineContext>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl CortexEngine {
    /// Create an engine. Nothing connects until [`start`](Self::start).
    ///
    /// # Errors
    /// `Config` if the configuration is unusable.
    pub fn new(config: CortexConfig) -> CortexResult<Self> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(EngineContext::new(config)),
            supervisor: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CortexConfig {
        &self.ctx.config
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Spawn the supervisor on the current Tokio runtime. Idempotent.
    ///
    /// # Errors
    /// `InvalidState` when called outside a Tokio runtime.
    pub fn start(&self) -> CortexResult<()> {
        let mut supervisor = lock(&self.supervisor);
        if supervisor.as_ref().is_some_and(|s| !s.task.is_finished()) {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| CortexError::invalid_state("start", "outside a Tokio runtime"))?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(supervise(Arc::clone(&self.ctx), shutdown_rx));
        *supervisor = Some(Supervisor { shutdown, task });
        tracing::info!(url = %self.ctx.config.cortex_url, "Engine started");
        Ok(())
    }

    /// Stop the supervisor. Live sessions are closed on the service first, then
    /// pending calls fail, sessions end locally and the socket closes.
    pub async fn stop(&self) {
        let supervisor = lock(&self.supervisor).take();
        let Some(supervisor) = supervisor else {
            return;
        };
        let _ = supervisor.shutdown.send(true);
        if let Err(e) = supervisor.task.await {
            if e.is_panic() {
                tracing::error!("Engine supervisor panicked");
            }
        }
        tracing::info!("Engine stopped");
    }

    /// Whether the supervisor is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.supervisor)
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Re-run the authorization handshake on the live connection.
    ///
    /// The current token keeps working until the handshake settles; it is
    /// replaced on success and dropped if the handshake ends anywhere else.
    pub async fn reauthorize(&self) -> CortexResult<ConnectionState> {
        let result = authorizer::authorize(&self.ctx).await;
        self.ctx.surface("authorize", result)
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.ctx.auth.state()
    }

    /// License confirmed by the last completed handshake.
    #[must_use]
    pub fn license(&self) -> Option<LicenseInfo> {
        self.ctx.auth.license()
    }

    #[must_use]
    pub fn transport_state(&self) -> TransportState {
        *lock(&self.ctx.transport_state)
    }

    // ─── Headsets ───────────────────────────────────────────────────────

    /// Query the headsets Cortex can see.
    pub async fn query_headsets(&self) -> CortexResult<Vec<Headset>> {
        let result = headsets::query_headsets(&self.ctx).await;
        self.ctx.surface("queryHeadsets", result)
    }

    /// Last headset list returned by a query on this connection.
    #[must_use]
    pub fn headsets(&self) -> Option<Vec<Headset>> {
        self.ctx.headsets.last()
    }

    /// Pair with a headset. Completion is reported on the device-connected topic.
    pub async fn connect_device(&self, headset_id: &str) -> CortexResult<()> {
        let result = headsets::control_device(&self.ctx, DeviceCommand::Connect, Some(headset_id)).await;
        self.ctx.surface("controlDevice", result)
    }

    pub async fn disconnect_device(&self, headset_id: &str) -> CortexResult<()> {
        let result =
            headsets::control_device(&self.ctx, DeviceCommand::Disconnect, Some(headset_id)).await;
        self.ctx.surface("controlDevice", result)
    }

    /// Ask Cortex to rescan for headsets.
    pub async fn refresh_headsets(&self) -> CortexResult<()> {
        let result = headsets::control_device(&self.ctx, DeviceCommand::Refresh, None).await;
        self.ctx.surface("controlDevice", result)
    }

    // ─── Sessions ───────────────────────────────────────────────────────

    /// Open a session on `headset_id` and subscribe the configured default channels.
    ///
    /// Channels the service refuses are listed in [`SessionStart::failures`]
    /// and published on the error topic; the session stays open.
    ///
    /// # Errors
    /// `InvalidState` unless authorized, `AlreadyInUse` if the headset has a session.
    pub async fn start_session(&self, headset_id: &str) -> CortexResult<SessionStart> {
        let result = sessions::start_session(&self.ctx, headset_id).await;
        self.ctx.surface("createSession", result)
    }

    /// Close a session. Closing an unknown session is a no-op.
    pub async fn close_session(&self, session_id: &str) -> CortexResult<()> {
        let result = sessions::close_session(&self.ctx, session_id).await;
        self.ctx.surface("updateSession", result)
    }

    pub async fn close_session_by_headset(&self, headset_id: &str) -> CortexResult<()> {
        let result = sessions::close_session_by_headset(&self.ctx, headset_id).await;
        self.ctx.surface("updateSession", result)
    }

    /// Close the session opened last.
    pub async fn close_most_recent_session(&self) -> CortexResult<()> {
        let result = sessions::close_most_recent(&self.ctx).await;
        self.ctx.surface("updateSession", result)
    }

    #[must_use]
    pub fn session_for_headset(&self, headset_id: &str) -> Option<String> {
        self.ctx.sessions.session_for_headset(headset_id)
    }

    /// Whether the headset's session has delivered data.
    #[must_use]
    pub fn has_data_stream(&self, headset_id: &str) -> bool {
        self.ctx.sessions.has_data_stream(headset_id)
    }

    /// Live sessions, oldest first.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionSummary> {
        self.ctx.sessions.summaries()
    }

    /// Most recent `dev` row of the headset's session.
    pub fn device_info(&self, headset_id: &str) -> CortexResult<Option<DeviceInfo>> {
        self.ctx.sessions.device_info(headset_id)
    }

    // ─── Streams ────────────────────────────────────────────────────────

    /// Subscribe to decoded rows of `T` from the headset's session.
    ///
    /// The subscription closes with the session. Drop it to unsubscribe.
    ///
    /// # Errors
    /// `NotFound` if the headset has no session.
    pub fn subscribe<T: ChannelData>(&self, headset_id: &str) -> CortexResult<Subscription<T>> {
        self.ctx.sessions.subscribe::<T>(headset_id)
    }

    /// Subscribe more channels on the headset's live session.
    pub async fn subscribe_channels(
        &self,
        headset_id: &str,
        channels: &[Channel],
    ) -> CortexResult<SubscribeOutcome> {
        let result = sessions::subscribe_channels(&self.ctx, headset_id, channels).await;
        self.ctx.surface("subscribe", result)
    }

    pub async fn unsubscribe_channels(&self, headset_id: &str, channels: &[Channel]) -> CortexResult<()> {
        let result = sessions::unsubscribe_channels(&self.ctx, headset_id, channels).await;
        self.ctx.surface("unsubscribe", result)
    }

    // ─── Events ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.ctx.hub
    }

    /// One handle over every engine-wide topic.
    #[must_use]
    pub fn event_pump(&self) -> EventPump {
        EventPump::new(&self.ctx.hub)
    }

    #[must_use]
    pub fn training(&self) -> Trainer<'_> {
        Trainer::new(&self.ctx)
    }

    #[must_use]
    pub fn profiles(&self) -> ProfileManager<'_> {
        ProfileManager::new(&self.ctx)
    }
}

impl Drop for CortexEngine {
    fn drop(&mut self) {
        let supervisor = self
            .supervisor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(supervisor) = supervisor {
            supervisor.task.abort();
        }
    }
}

// ─── Supervisor ─────────────────────────────────────────────────────────

enum ConnectionEnd {
    Shutdown,
    Lost(String),
}

async fn supervise(ctx: Arc<EngineContext>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(&ctx.config.reconnect);
    loop {
        ctx.auth.transition(&ctx.hub, ConnectionState::ServiceConnecting);
        let connected = tokio::select! {
            result = Transport::connect(&ctx.config, Arc::clone(&ctx.transport_state)) => result,
            _ = shutdown.changed() => return,
        };

        match connected {
            Ok((transport, inbound)) => {
                backoff.reset();
                match run_connection(&ctx, transport, inbound, &mut shutdown).await {
                    ConnectionEnd::Shutdown => return,
                    ConnectionEnd::Lost(reason) => {
                        tracing::warn!(%reason, "Connection to Cortex lost");
                    }
                }
            }
            Err(e) => {
                ctx.auth.transition(&ctx.hub, ConnectionState::EmotivAppNotFound);
                ctx.hub.report("connect", &e);
            }
        }

        if !ctx.config.reconnect.enabled {
            tracing::info!("Reconnect disabled; supervisor exiting");
            return;
        }
        let Some(delay) = backoff.next_delay() else {
            tracing::error!(attempts = backoff.attempts(), "Giving up on reconnecting to Cortex");
            return;
        };
        tracing::info!(
            attempt = backoff.attempts(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Reconnecting to Cortex"
        );
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn run_connection(
    ctx: &Arc<EngineContext>,
    transport: Transport,
    mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    ctx.rpc.attach(transport.sender());
    tracing::info!(url = %ctx.config.cortex_url, "Connected to Cortex");

    let mut background = JoinSet::new();
    spawn_handshake(ctx, &mut background);

    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut poll = match ctx.config.headsets.poll_interval_secs {
        0 => None,
        secs => {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(interval)
        }
    };

    let end = loop {
        tokio::select! {
            event = inbound.recv() => match event {
                Some(TransportEvent::Message(value)) => dispatch(ctx, value, &mut background),
                Some(TransportEvent::Closed { reason }) => break ConnectionEnd::Lost(reason),
                None => break ConnectionEnd::Lost("transport reader stopped".into()),
            },
            _ = sweep.tick() => {
                ctx.rpc.sweep_expired();
            }
            () = next_poll(&mut poll) => {
                if ctx.auth.state() == ConnectionState::Authorized {
                    spawn_headset_query(ctx, &mut background);
                }
            }
            Some(joined) = background.join_next(), if !background.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!("Background engine task panicked");
                    }
                }
            }
            _ = shutdown.changed() => break ConnectionEnd::Shutdown,
        }
    };

    let reason = match &end {
        ConnectionEnd::Shutdown => "engine stopped",
        ConnectionEnd::Lost(reason) => reason.as_str(),
    };
    background.abort_all();
    if matches!(end, ConnectionEnd::Shutdown) {
        close_remote_sessions(ctx, &mut inbound).await;
    }
    ctx.rpc.detach();
    ctx.auth.reset(&ctx.hub);
    ctx.rpc.fail_all(reason);
    sessions::end_all(ctx);
    ctx.headsets.clear();
    transport.close().await;
    end
}

/// Send `updateSession` close for every live session, resolving replies until
/// all have answered or timed out.
async fn close_remote_sessions(
    ctx: &EngineContext,
    inbound: &mut mpsc::UnboundedReceiver<TransportEvent>,
) {
    let session_ids: Vec<String> = ctx
        .sessions
        .summaries()
        .into_iter()
        .map(|summary| summary.session_id)
        .collect();
    if session_ids.is_empty() {
        return;
    }
    tracing::info!(count = session_ids.len(), "Closing sessions before shutdown");

    let closes = futures_util::future::join_all(
        session_ids
            .iter()
            .map(|session_id| sessions::close_session(ctx, session_id)),
    );
    tokio::pin!(closes);
    loop {
        tokio::select! {
            results = &mut closes => {
                for (session_id, result) in session_ids.iter().zip(results) {
                    if let Err(e) = result {
                        tracing::warn!(%session_id, "Session close failed during shutdown: {e}");
                    }
                }
                return;
            }
            event = inbound.recv() => match event {
                Some(TransportEvent::Message(value)) => {
                    if let Inbound::Response(response) = Inbound::classify(value) {
                        ctx.rpc.resolve(response);
                    }
                }
                Some(TransportEvent::Closed { .. }) | None => return,
            },
        }
    }
}

async fn next_poll(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle one inbound document.
fn dispatch(ctx: &Arc<EngineContext>, value: Value, background: &mut JoinSet<()>) {
    match Inbound::classify(value) {
        Inbound::Response(response) => ctx.rpc.resolve(response),
        Inbound::Stream(frame) => sessions::route_frame(ctx, &frame),
        Inbound::Warning(warning) => handle_warning(ctx, &warning, background),
        Inbound::Unknown(value) => {
            tracing::debug!(message = %value, "Ignoring unrecognized Cortex message");
        }
    }
}

fn handle_warning(ctx: &Arc<EngineContext>, warning: &Warning, background: &mut JoinSet<()>) {
    tracing::debug!(code = warning.code, message = %warning.text(), "Cortex warning");
    match warning.code {
        WarningCodes::STREAM_STOP | WarningCodes::SESSION_AUTO_CLOSED => {
            match warning.session_id() {
                Some(session_id) => sessions::on_stream_stop(ctx, session_id),
                None => tracing::warn!(code = warning.code, "Session warning without a session id"),
            }
        }
        WarningCodes::HEADSET_CONNECTED => {
            if let Some(headset_id) = warning.headset_id() {
                tracing::info!(headset_id, "Headset connected");
                ctx.hub
                    .emit(EngineEvent::DeviceConnected(headset_id.to_string()));
            }
            spawn_headset_query(ctx, background);
        }
        WarningCodes::HEADSET_SCAN_FINISHED => spawn_headset_query(ctx, background),
        WarningCodes::HEADSET_CANNOT_CONNECT
        | WarningCodes::HEADSET_CONNECTING_TIMEOUT
        | WarningCodes::HEADSET_DATA_TIMEOUT => {
            publish_warning(ctx, warning);
            spawn_headset_query(ctx, background);
        }
        WarningCodes::USER_LOGIN => {
            if ctx.auth.awaits_login() {
                tracing::info!("User logged in; resuming authorization");
                spawn_handshake(ctx, background);
            }
        }
        WarningCodes::USER_LOGOUT => {
            tracing::info!("User logged out of the EMOTIV Launcher");
            ctx.auth.transition(&ctx.hub, ConnectionState::LoginNotYet);
            sessions::end_all(ctx);
        }
        WarningCodes::ACCESS_RIGHT_GRANTED => {
            if ctx.auth.awaits_access() {
                tracing::info!("Access granted; resuming authorization");
                spawn_handshake(ctx, background);
            }
        }
        WarningCodes::ACCESS_RIGHT_REJECTED => {
            ctx.auth.transition(&ctx.hub, ConnectionState::AuthorizeFailed);
            publish_warning(ctx, warning);
        }
        WarningCodes::USER_NOT_ACCEPT_LICENSE
        | WarningCodes::USER_NOT_HAVE_ACCESS_RIGHT
        | WarningCodes::USER_REQUEST_ACCESS_RIGHT => publish_warning(ctx, warning),
        WarningCodes::PROFILE_LOADED | WarningCodes::PROFILE_UNLOADED => {
            tracing::info!(code = warning.code, message = %warning.text(), "Profile state changed");
        }
        _ => {}
    }
}

fn publish_warning(ctx: &EngineContext, warning: &Warning) {
    let event = ErrorEvent {
        method: "warning".to_string(),
        code: Some(warning.code),
        message: warning.text(),
    };
    tracing::warn!(code = warning.code, "{}", event.message);
    ctx.hub.emit(EngineEvent::Error(event));
}

/// Run the handshake, then load the headset list once authorized.
fn spawn_handshake(ctx: &Arc<EngineContext>, background: &mut JoinSet<()>) {
    let ctx = Arc::clone(ctx);
    background.spawn(async move {
        match authorizer::authorize(&ctx).await {
            Ok(ConnectionState::Authorized) => {
                if let Err(e) = headsets::query_headsets(&ctx).await {
                    ctx.hub.report("queryHeadsets", &e);
                }
            }
            Ok(_) => {}
            Err(e) if e.is_transport_error() => {}
            Err(e) => ctx.hub.report("authorize", &e),
        }
    });
}

fn spawn_headset_query(ctx: &Arc<EngineContext>, background: &mut JoinSet<()>) {
    let ctx = Arc::clone(ctx);
    background.spawn(async move {
        match headsets::query_headsets(&ctx).await {
            Ok(_) => {}
            Err(e) if e.is_transport_error() => {}
            Err(e) => ctx.hub.report("queryHeadsets", &e),
        }
    });
}
