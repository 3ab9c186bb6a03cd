//! # Error Types
//!
//! Every fallible engine operation returns [`CortexError`]. The variants are
//! grouped by how the engine reacts to them:
//!
//! | Group | Variants | Engine reaction |
//! |-------|----------|-----------------|
//! | Transport | `ConnectionFailed`, `ConnectionLost`, `NotConnected`, `WebSocket`, `Tls` | reconnect with backoff, authorizer reset |
//! | Request | `Timeout`, `Rpc` | surfaced to the call site, non-fatal |
//! | State | `InvalidState`, `AlreadyInUse`, `NotFound` | rejected locally, nothing sent |
//! | Streams | `PartialSubscriptionFailure` | session stays open, channel skipped |
//! | Training | `TrainingConflict` | rejected locally, stage untouched |
//!
//! ## Error Code Mapping
//!
//! The Cortex API returns numeric error codes in JSON-RPC error responses.
//! They are kept verbatim in [`CortexError::Rpc`]; [`CortexError::api_kind`]
//! classifies the known ones.

use thiserror::Error;

/// Convenient Result alias for engine operations.
pub type CortexResult<T> = std::result::Result<T, CortexError>;

/// All errors that can occur while driving the Cortex service.
#[derive(Error, Debug)]
pub enum CortexError {
    // ─── Transport ──────────────────────────────────────────────────
    /// Failed to establish a WebSocket connection to the Cortex service.
    #[error("Failed to connect to Cortex at {url}: {reason}. Is the EMOTIV Launcher running?")]
    ConnectionFailed { url: String, reason: String },

    /// WebSocket connection was lost after being established.
    #[error("Connection to Cortex lost: {reason}")]
    ConnectionLost { reason: String },

    /// The engine has no live transport.
    #[error("Not connected to Cortex")]
    NotConnected,

    /// Low-level WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    Tls(String),

    // ─── Request ────────────────────────────────────────────────────
    /// No response arrived for `method` within the RPC deadline.
    #[error("{method} timed out after {seconds}s")]
    Timeout { method: String, seconds: u64 },

    /// The service answered `method` with a JSON-RPC error object.
    #[error("{method} failed with Cortex error {code}: {message}")]
    Rpc {
        method: String,
        code: i32,
        message: String,
    },

    // ─── State ──────────────────────────────────────────────────────
    /// The operation is not permitted in the current authorizer or session state.
    #[error("{operation} is not allowed while {state}")]
    InvalidState { operation: String, state: String },

    /// The headset already has a session (or one is being created).
    #[error("Headset {headset_id} already has an active session")]
    AlreadyInUse { headset_id: String },

    /// A session or headset lookup found nothing.
    #[error("No {kind} found for '{id}'")]
    NotFound { kind: &'static str, id: String },

    // ─── Streams ────────────────────────────────────────────────────
    /// One channel of a subscribe request was refused; the others may be live.
    #[error("Subscribe to '{channel}' failed for session {session_id} (code {code}): {message}")]
    PartialSubscriptionFailure {
        session_id: String,
        channel: String,
        code: i32,
        message: String,
    },

    // ─── Training ───────────────────────────────────────────────────
    /// A training start was requested while another action is mid-training.
    #[error(
        "Cannot start training '{requested}' in session {session_id}: '{active}' is still in progress"
    )]
    TrainingConflict {
        session_id: String,
        active: String,
        requested: String,
    },

    // ─── Protocol ───────────────────────────────────────────────────
    /// Received an unexpected or malformed message from the Cortex service.
    #[error("Protocol error: {reason}")]
    Protocol { reason: String },

    // ─── Config ─────────────────────────────────────────────────────
    /// Configuration file error (missing, malformed, or invalid values).
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    // ─── I/O ────────────────────────────────────────────────────────
    /// Filesystem or I/O error (config file reading, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Semantic classification of a Cortex JSON-RPC error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    MethodNotFound,
    NoHeadsetConnected,
    InvalidLicense,
    HeadsetUnavailable,
    SessionAlreadyExists,
    SessionNotActivated,
    InvalidToken,
    TokenExpired,
    InvalidStream,
    InvalidCredentials,
    LicenseExpired,
    UserNotLoggedIn,
    NotApproved,
    HeadsetNotReady,
    CortexStarting,
    Other,
}

impl ApiErrorKind {
    /// Classify a raw Cortex error code.
    ///
    /// Known error codes from the Cortex v2 API docs:
    /// - `-32601`: Method not found
    /// - `-32001`: No headset connected
    /// - `-32002`: Invalid license ID
    /// - `-32004`: Headset unavailable
    /// - `-32005`: Session already exists
    /// - `-32012`: Session must be activated
    /// - `-32014`: Invalid cortex token
    /// - `-32015`: Cortex token expired
    /// - `-32016`: Invalid stream
    /// - `-32021`: Invalid client credentials
    /// - `-32024`: License expired
    /// - `-32033`: User not logged in
    /// - `-32142`: Unpublished/unapproved application
    /// - `-32152`: Headset not ready
    ///
    /// Legacy deployments may also return `-32102` (not approved) and
    /// `-32122` (service starting).
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            -32601 => Self::MethodNotFound,
            -32001 => Self::NoHeadsetConnected,
            -32002 => Self::InvalidLicense,
            -32004 => Self::HeadsetUnavailable,
            -32005 => Self::SessionAlreadyExists,
            -32012 => Self::SessionNotActivated,
            -32014 => Self::InvalidToken,
            -32015 => Self::TokenExpired,
            -32016 => Self::InvalidStream,
            -32021 => Self::InvalidCredentials,
            -32024 => Self::LicenseExpired,
            -32033 => Self::UserNotLoggedIn,
            -32142 | -32102 => Self::NotApproved,
            -32152 => Self::HeadsetNotReady,
            -32122 => Self::CortexStarting,
            _ => Self::Other,
        }
    }
}

impl CortexError {
    /// Build an [`CortexError::Rpc`] for the given originating method.
    pub fn rpc(method: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        CortexError::Rpc {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Build an [`CortexError::InvalidState`].
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        CortexError::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// The Cortex error code, for variants that carry one.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            CortexError::Rpc { code, .. } | CortexError::PartialSubscriptionFailure { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }

    /// Semantic classification of a remote error, `None` for local errors.
    #[must_use]
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        match self {
            CortexError::Rpc { code, .. } => Some(ApiErrorKind::from_code(*code)),
            _ => None,
        }
    }

    /// Returns `true` if this error is transient and the operation can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CortexError::ConnectionLost { .. }
                | CortexError::Timeout { .. }
                | CortexError::WebSocket(_)
        ) || self.api_kind() == Some(ApiErrorKind::CortexStarting)
    }

    /// Returns `true` if the connection is dead and the engine must reconnect.
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            CortexError::ConnectionFailed { .. }
                | CortexError::ConnectionLost { .. }
                | CortexError::NotConnected
                | CortexError::WebSocket(_)
                | CortexError::Tls(_)
        )
    }
}

// ─── From impls for external error types ────────────────────────────────

impl From<tokio_tungstenite::tungstenite::Error> for CortexError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        CortexError::WebSocket(err.to_string())
    }
}

#[cfg(feature = "native-tls")]
impl From<native_tls::Error> for CortexError {
    fn from(err: native_tls::Error) -> Self {
        CortexError::Tls(err.to_string())
    }
}

#[cfg(feature = "config-toml")]
impl From<toml::de::Error> for CortexError {
    fn from(err: toml::de::Error) -> Self {
        CortexError::Config {
            reason: err.to_string(),
        }
    }
}
