//! # Configuration
//!
//! [`CortexConfig`] holds everything the engine needs: credentials, the
//! service URL, timeouts, reconnect backoff, the default channel set for new
//! sessions, headset polling, and the training round thresholds.
//!
//! Build one with [`CortexConfig::new`], or load it with
//! [`CortexConfig::discover`], which tries an explicit file, `$CORTEX_CONFIG`,
//! `./cortex.toml`, the per-user config file and finally the environment.
//! `EMOTIV_CLIENT_ID`, `EMOTIV_CLIENT_SECRET`, `EMOTIV_CORTEX_URL` and
//! `EMOTIV_LICENSE` override file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CortexError, CortexResult};
use crate::protocol::streams::Channel;

/// The Cortex service in the EMOTIV Launcher. Serves a self-signed certificate.
pub const DEFAULT_CORTEX_URL: &str = "wss://localhost:6868";

const DEFAULT_DEBIT: u32 = 10;

const ENV_CLIENT_ID: &str = "EMOTIV_CLIENT_ID";
const ENV_CLIENT_SECRET: &str = "EMOTIV_CLIENT_SECRET";
const ENV_CORTEX_URL: &str = "EMOTIV_CORTEX_URL";
const ENV_LICENSE: &str = "EMOTIV_LICENSE";
const ENV_CONFIG_PATH: &str = "CORTEX_CONFIG";

/// Engine configuration.
///
/// Only the credentials are required; every table and other key falls back to
/// its default.
///
/// ```no_run
/// use emotiv_cortex_engine::config::CortexConfig;
///
/// // Explicit file, $CORTEX_CONFIG, ./cortex.toml, user config, then the environment.
/// let config = CortexConfig::discover(None)?;
/// # Ok::<(), emotiv_cortex_engine::CortexError>(())
/// ```
///
/// ```
/// use emotiv_cortex_engine::config::CortexConfig;
///
/// let mut config = CortexConfig::new("my-client-id", "my-client-secret");
/// config.reconnect.max_attempts = 3;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfig {
    /// From the EMOTIV developer portal.
    pub client_id: String,
    pub client_secret: String,

    #[serde(default = "default_cortex_url")]
    pub cortex_url: String,

    /// License id passed to `authorize`. The user's own license is used when unset.
    #[serde(default)]
    pub license: Option<String>,

    /// Sessions debited from the license on `authorize`.
    #[serde(default = "default_debit")]
    pub debit: u32,

    /// Skip certificate checks for a remote `cortex_url`. Localhost is always unchecked.
    #[serde(default)]
    pub allow_insecure_tls: bool,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub headsets: HeadsetConfig,
    #[serde(default)]
    pub training: TrainingConfig,
}

/// `[timeouts]`, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per JSON-RPC request.
    pub rpc_timeout_secs: u64,
    /// TCP connect plus WebSocket upgrade.
    pub connect_timeout_secs: u64,
}

/// `[reconnect]`: exponential backoff after the connection drops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Delay before the first retry; doubles on each failure.
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Consecutive failures before giving up. 0 retries forever.
    pub max_attempts: u32,
}

/// `[session]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Channels subscribed right after `createSession` succeeds.
    pub default_streams: Vec<Channel>,
}

/// `[headsets]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadsetConfig {
    /// Seconds between background `queryHeadsets` calls. 0 disables polling.
    pub poll_interval_secs: u64,
}

/// `[training]`: accepted-round thresholds of mental-command training.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Rounds before live feedback is shown.
    pub feedback_rounds: u32,
    /// Rounds before training may be finished.
    pub min_rounds: u32,
    /// Rounds at which progress reads 1.0.
    pub max_rounds: u32,
}

fn default_cortex_url() -> String {
    DEFAULT_CORTEX_URL.to_string()
}

fn default_debit() -> u32 {
    DEFAULT_DEBIT
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: 10,
            connect_timeout_secs: 5,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_secs: 1,
            max_delay_secs: 60,
            max_attempts: 0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_streams: vec![
                Channel::MentalCommand,
                Channel::DeviceInfo,
                Channel::SystemEvent,
            ],
        }
    }
}

impl Default for HeadsetConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 0,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            feedback_rounds: 4,
            min_rounds: 11,
            max_rounds: 16,
        }
    }
}

// ─── CortexConfig impl ─────────────────────────────────────────────────

impl CortexConfig {
    /// Credentials with every other setting at its default.
    #[must_use]
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cortex_url: default_cortex_url(),
            license: None,
            debit: DEFAULT_DEBIT,
            allow_insecure_tls: false,
            timeouts: TimeoutConfig::default(),
            reconnect: ReconnectConfig::default(),
            session: SessionConfig::default(),
            headsets: HeadsetConfig::default(),
            training: TrainingConfig::default(),
        }
    }

    /// Credentials from `EMOTIV_CLIENT_ID` and `EMOTIV_CLIENT_SECRET`, plus the
    /// optional `EMOTIV_CORTEX_URL` and `EMOTIV_LICENSE`.
    pub fn from_env() -> CortexResult<Self> {
        let mut config = Self::new(required_env(ENV_CLIENT_ID)?, required_env(ENV_CLIENT_SECRET)?);
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a TOML file. Environment variables win over file values.
    #[cfg(feature = "config-toml")]
    pub fn from_file(path: impl AsRef<Path>) -> CortexResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| CortexError::Config {
            reason: format!("Failed to read config file '{}': {e}", path.display()),
        })?;
        let mut config: Self = toml::from_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Without TOML support only the environment can configure the engine.
    #[cfg(not(feature = "config-toml"))]
    pub fn from_file(path: impl AsRef<Path>) -> CortexResult<Self> {
        Err(CortexError::Config {
            reason: format!(
                "Cannot read '{}': built without the config-toml feature",
                path.as_ref().display()
            ),
        })
    }

    fn apply_env_overrides(&mut self) {
        let set = [ENV_CLIENT_ID, ENV_CLIENT_SECRET, ENV_CORTEX_URL, ENV_LICENSE]
            .into_iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key, value)));
        for (key, value) in set {
            match key {
                ENV_CLIENT_ID => self.client_id = value,
                ENV_CLIENT_SECRET => self.client_secret = value,
                ENV_CORTEX_URL => self.cortex_url = value,
                _ => self.license = Some(value),
            }
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> CortexResult<()> {
        if self.timeouts.rpc_timeout_secs == 0 {
            return Err(CortexError::Config {
                reason: "timeouts.rpc_timeout_secs must be greater than 0".into(),
            });
        }
        if self.session.default_streams.is_empty() {
            return Err(CortexError::Config {
                reason: "session.default_streams must name at least one channel".into(),
            });
        }
        if self.training.min_rounds > self.training.max_rounds {
            return Err(CortexError::Config {
                reason: format!(
                    "training.min_rounds ({}) exceeds training.max_rounds ({})",
                    self.training.min_rounds, self.training.max_rounds
                ),
            });
        }
        Ok(())
    }

    /// Load config from the first place that has one:
    ///
    /// 1. `explicit_path`
    /// 2. the file named by `CORTEX_CONFIG`
    /// 3. `./cortex.toml`
    /// 4. `~/.config/emotiv-cortex/cortex.toml` (`%APPDATA%` on Windows)
    /// 5. environment variables alone
    pub fn discover(explicit_path: Option<&Path>) -> CortexResult<Self> {
        if let Some(path) = explicit_path {
            return Self::from_file(path);
        }
        let candidates = [
            std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from),
            Some(PathBuf::from("cortex.toml")),
            user_config_path(),
        ];
        match candidates.into_iter().flatten().find(|path| path.exists()) {
            Some(path) => Self::from_file(&path),
            None => Self::from_env(),
        }
    }

    /// Whether the TLS connector skips certificate checks: always for a
    /// loopback `cortex_url`, otherwise only with `allow_insecure_tls`.
    #[must_use]
    pub fn should_accept_invalid_certs(&self) -> bool {
        self.allow_insecure_tls || is_localhost(&self.cortex_url)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

/// `localhost`, `127.0.0.1` or `[::1]`, with or without a scheme and port.
fn is_localhost(url: &str) -> bool {
    let authority = url
        .strip_prefix("wss://")
        .or_else(|| url.strip_prefix("ws://"))
        .unwrap_or(url);

    if let Some(rest) = authority.strip_prefix('[') {
        let host = rest.split(']').next().unwrap_or("");
        return host == "::1";
    }

    // Regular host:port: split on the last colon
    let host = if let Some(idx) = authority.rfind(':') {
        &authority[..idx]
    } else {
        authority
    };
    matches!(host, "localhost" | "127.0.0.1")
}

fn required_env(key: &str) -> CortexResult<String> {
    std::env::var(key).map_err(|_| CortexError::Config {
        reason: format!("{key} environment variable not set"),
    })
}

/// Per-user config file location.
fn user_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA")
            .ok()
            .map(|dir| PathBuf::from(dir).join("emotiv-cortex").join("cortex.toml"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(|dir| {
            PathBuf::from(dir)
                .join(".config")
                .join("emotiv-cortex")
                .join("cortex.toml")
        })
    }
}
