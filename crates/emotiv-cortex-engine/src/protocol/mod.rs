//! Wire types of the Cortex JSON-RPC API, one module per method family.
//!
//! Nothing here performs I/O. [`rpc`] classifies inbound frames; [`streams`]
//! holds the raw data-frame shapes that [`crate::parser`] decodes.

pub mod auth;
pub mod constants;
pub mod headset;
pub mod profiles;
pub mod rpc;
pub mod session;
pub mod streams;
pub mod training;
