//! # Authorization
//!
//! Drives the handshake that turns a fresh socket into an authorized
//! connection:
//!
//! ```text
//! ServiceConnecting ─► LoginWaiting ─► Authorizing ─► Authorized
//!        │                  │               │
//!        ▼                  ▼               ├─► AuthorizeFailed
//! EmotivAppNotFound    LoginNotYet          ├─► LicenseExpired
//!                                           └─► LicenseHardLimited
//! ```
//!
//! The authorizer owns the cortex token. Session and data operations ask it
//! for the token and fail with `InvalidState` unless the state is
//! `Authorized`.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde_json::{Value, json};

use crate::engine::EngineContext;
use crate::error::{ApiErrorKind, CortexError, CortexResult};
use crate::events::{EngineEvent, EventHub};
use crate::lock;
use crate::protocol::auth::{
    AccessRight, AuthorizeResult, LicenseInfo, LicenseInfoResult, LicenseStatus, UserLoginInfo,
};
use crate::protocol::constants::Methods;

/// Where the engine stands with the Cortex service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Opening (or re-opening) the socket.
    #[default]
    ServiceConnecting,
    /// The socket could not be opened; the Launcher is probably not running.
    EmotivAppNotFound,
    /// Asking the service who is logged in.
    LoginWaiting,
    /// Nobody is logged in to the Launcher.
    LoginNotYet,
    /// Access check and `authorize` in progress, or waiting for user approval.
    Authorizing,
    AuthorizeFailed,
    Authorized,
    LicenseExpired,
    LicenseHardLimited,
}

impl ConnectionState {
    /// A handshake step that has not settled yet.
    #[must_use]
    pub fn is_handshaking(self) -> bool {
        matches!(
            self,
            ConnectionState::LoginWaiting | ConnectionState::Authorizing
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::ServiceConnecting => "connecting to the Cortex service",
            ConnectionState::EmotivAppNotFound => "the EMOTIV Launcher is not reachable",
            ConnectionState::LoginWaiting => "checking the user login",
            ConnectionState::LoginNotYet => "no user is logged in",
            ConnectionState::Authorizing => "authorizing",
            ConnectionState::AuthorizeFailed => "authorization failed",
            ConnectionState::Authorized => "authorized",
            ConnectionState::LicenseExpired => "the license has expired",
            ConnectionState::LicenseHardLimited => "the license is past its hard limit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct AuthSession {
    state: ConnectionState,
    token: Option<String>,
    license: Option<LicenseInfo>,
}

/// Connection state, token and license of one engine.
#[derive(Debug, Default)]
pub(crate) struct Authorizer {
    session: Mutex<AuthSession>,
    handshake_running: AtomicBool,
}

impl Authorizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        lock(&self.session).state
    }

    pub(crate) fn license(&self) -> Option<LicenseInfo> {
        lock(&self.session).license.clone()
    }

    /// The cortex token, or `InvalidState` naming `operation` unless authorized.
    ///
    /// While a handshake renews an earlier authorization the previous token
    /// stays usable.
    pub(crate) fn token(&self, operation: &str) -> CortexResult<String> {
        let session = lock(&self.session);
        match (&session.token, session.state) {
            (Some(token), state)
                if state == ConnectionState::Authorized || state.is_handshaking() =>
            {
                Ok(token.clone())
            }
            (_, state) => Err(CortexError::invalid_state(operation, state)),
        }
    }

    /// Move to `next`, publishing it if it differs. Settling anywhere but
    /// `Authorized` drops the token.
    pub(crate) fn transition(&self, hub: &EventHub, next: ConnectionState) {
        let changed = {
            let mut session = lock(&self.session);
            if next != ConnectionState::Authorized && !next.is_handshaking() {
                session.token = None;
            }
            let changed = session.state != next;
            session.state = next;
            changed
        };
        if changed {
            tracing::info!(state = ?next, "Connection state changed");
            hub.emit(EngineEvent::ConnectionStateChanged(next));
        }
    }

    fn complete(&self, hub: &EventHub, token: String, license: LicenseInfo) {
        {
            let mut session = lock(&self.session);
            session.token = Some(token);
            session.license = Some(license.clone());
        }
        self.transition(hub, ConnectionState::Authorized);
        hub.emit(EngineEvent::Authorized(license));
    }

    /// Back to `ServiceConnecting`, forgetting the token.
    pub(crate) fn reset(&self, hub: &EventHub) {
        self.transition(hub, ConnectionState::ServiceConnecting);
    }

    /// Whether a login warning should re-run the handshake.
    pub(crate) fn awaits_login(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::LoginNotYet | ConnectionState::LoginWaiting
        )
    }

    /// Whether an access-granted warning should re-run the handshake.
    pub(crate) fn awaits_access(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Authorizing | ConnectionState::AuthorizeFailed
        )
    }

    fn try_begin_handshake(&self) -> Option<HandshakeGuard<'_>> {
        self.handshake_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| HandshakeGuard(&self.handshake_running))
    }
}

struct HandshakeGuard<'a>(&'a AtomicBool);

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run the handshake to completion. Returns the state it settled in.
///
/// A handshake already in flight makes this a no-op returning the current state.
pub(crate) async fn authorize(ctx: &EngineContext) -> CortexResult<ConnectionState> {
    let Some(_guard) = ctx.auth.try_begin_handshake() else {
        tracing::debug!("Handshake already running");
        return Ok(ctx.auth.state());
    };

    let result = handshake(ctx).await;
    match &result {
        Ok(state) => tracing::info!(state = ?state, "Handshake finished"),
        Err(e) if e.is_transport_error() => {
            tracing::debug!("Handshake interrupted by connection loss: {e}");
        }
        Err(e) => {
            let failed = if e.api_kind() == Some(ApiErrorKind::UserNotLoggedIn) {
                ConnectionState::LoginNotYet
            } else {
                ConnectionState::AuthorizeFailed
            };
            ctx.auth.transition(&ctx.hub, failed);
        }
    }
    result
}

async fn handshake(ctx: &EngineContext) -> CortexResult<ConnectionState> {
    let auth = &ctx.auth;
    let hub = &ctx.hub;
    let config = &ctx.config;

    auth.transition(hub, ConnectionState::LoginWaiting);
    let users: Vec<UserLoginInfo> = ctx.rpc.call_as(Methods::GET_USER_LOGIN, json!({})).await?;
    let Some(user) = users.first() else {
        tracing::info!("No user logged in to the EMOTIV Launcher; waiting for login");
        auth.transition(hub, ConnectionState::LoginNotYet);
        return Ok(ConnectionState::LoginNotYet);
    };
    tracing::debug!(username = %user.username, "User logged in");

    auth.transition(hub, ConnectionState::Authorizing);
    let credentials = json!({
        "clientId": config.client_id,
        "clientSecret": config.client_secret,
    });
    let access: AccessRight = ctx
        .rpc
        .call_as(Methods::HAS_ACCESS_RIGHT, credentials.clone())
        .await?;
    if !access.access_granted {
        let requested: AccessRight = ctx.rpc.call_as(Methods::REQUEST_ACCESS, credentials).await?;
        if !requested.access_granted {
            tracing::info!(
                message = %requested.message,
                "Waiting for the user to approve access in the EMOTIV Launcher"
            );
            return Ok(ConnectionState::Authorizing);
        }
    }

    let mut params = json!({
        "clientId": config.client_id,
        "clientSecret": config.client_secret,
        "debit": config.debit,
    });
    if let Some(license) = &config.license {
        params["license"] = Value::from(license.clone());
    }
    let authorized: AuthorizeResult = ctx.rpc.call_as(Methods::AUTHORIZE, params).await?;

    let info: LicenseInfoResult = ctx
        .rpc
        .call_as(
            Methods::GET_LICENSE_INFO,
            json!({ "cortexToken": authorized.cortex_token }),
        )
        .await?;

    let Some(license) = info.license else {
        return Err(CortexError::Protocol {
            reason: "getLicenseInfo returned no license".into(),
        });
    };

    let state = match license.status_at(Utc::now()) {
        LicenseStatus::Missing => {
            return Err(CortexError::Protocol {
                reason: "getLicenseInfo returned a license without an id".into(),
            });
        }
        LicenseStatus::Expired => ConnectionState::LicenseExpired,
        LicenseStatus::HardLimited => ConnectionState::LicenseHardLimited,
        LicenseStatus::SoftLimited => {
            tracing::warn!(
                license_id = %license.license_id,
                "License is past its soft limit; renew it soon"
            );
            ConnectionState::Authorized
        }
        LicenseStatus::Valid => ConnectionState::Authorized,
    };

    if state == ConnectionState::Authorized {
        tracing::info!(license_id = %license.license_id, "Authorized with Cortex");
        auth.complete(hub, authorized.cortex_token, license);
    } else {
        tracing::warn!(license_id = %license.license_id, state = ?state, "License is not usable");
        auth.transition(hub, state);
    }
    Ok(state)
}
