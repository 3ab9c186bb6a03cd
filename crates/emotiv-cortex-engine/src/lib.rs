//! # emotiv-cortex-engine
//!
//! A session, streaming and training engine for the
//! [Emotiv Cortex v2 WebSocket API](https://emotiv.gitbook.io/cortex-api/).
//!
//! One [`CortexEngine`] keeps a connection to the Cortex service alive,
//! authorizes against it, discovers headsets, opens one session per headset,
//! decodes the subscribed data channels into typed rows and drives the
//! mental-command training protocol. Results and failures are delivered
//! through typed topics the host drains on its own schedule.
//!
//! ## Quick Start
//!
//! ```no_run
//! use emotiv_cortex_engine::{ConnectionState, CortexConfig, CortexEngine, MentalCommand};
//!
//! #[tokio::main]
//! async fn main() -> emotiv_cortex_engine::CortexResult<()> {
//!     // Load config from environment or cortex.toml
//!     let config = CortexConfig::discover(None)?;
//!     let engine = CortexEngine::new(config)?;
//!     engine.start()?;
//!
//!     // Wait for the handshake
//!     let mut states = engine.events().subscribe_connection_state();
//!     while let Some(state) = states.recv().await {
//!         if state == ConnectionState::Authorized {
//!             break;
//!         }
//!     }
//!
//!     // Open a session on the first headset and read mental commands
//!     let headsets = engine.query_headsets().await?;
//!     let headset_id = &headsets[0].id;
//!     engine.start_session(headset_id).await?;
//!
//!     let mut commands = engine.subscribe::<MentalCommand>(headset_id)?;
//!     while let Some(command) = commands.recv().await {
//!         println!("{} {:.2}", command.action, command.power);
//!     }
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! | Module | Owns |
//! |--------|------|
//! | [`authorizer`] | connection state, cortex token, license |
//! | [`headsets`] | headset discovery and pairing |
//! | [`sessions`] | headset → session mapping, per-channel subscriptions |
//! | [`parser`] | typed rows decoded from `com`, `dev`, `sys`, `fac` |
//! | [`training`] | the per-action training state machine and training queries |
//! | [`profiles`] | stored training profiles |
//! | [`events`] | topics, subscriptions and the [`EventPump`] |
//!
//! ## Configuration
//!
//! See [`CortexConfig`] for the full configuration reference.
//! The simplest setup uses environment variables:
//!
//! ```bash
//! export EMOTIV_CLIENT_ID="your-client-id"
//! export EMOTIV_CLIENT_SECRET="your-client-secret"
//! ```
//!
//! Or a `cortex.toml` file:
//!
//! ```toml
//! client_id = "your-client-id"
//! client_secret = "your-client-secret"
//!
//! [session]
//! default_streams = ["com", "dev", "sys"]
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod authorizer;
pub mod config;
pub mod error;
pub mod events;
pub mod headsets;
pub mod parser;
pub mod profiles;
pub mod protocol;
pub mod sessions;
pub mod training;

mod correlator;
mod engine;
mod reconnect;
mod transport;

// ─── Public re-exports ──────────────────────────────────────────────────

pub use authorizer::ConnectionState;
pub use config::CortexConfig;
pub use engine::CortexEngine;
pub use error::{CortexError, CortexResult};
pub use events::{EngineEvent, ErrorEvent, EventHub, EventPump, Subscription};
pub use headsets::{Headset, HeadsetModel};
pub use parser::{ChannelData, DeviceInfo, FacialExpression, MentalCommand, SystemEvent};
pub use profiles::{ProfileEvent, ProfileManager};
pub use protocol::streams::Channel;
pub use sessions::{SessionStart, SessionSummary};
pub use training::{Trainer, TrainingEvent, TrainingStage};
pub use transport::TransportState;

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
