//! # accolade-client
//!
//! Client side of the Accolade relay.
//!
//! - [`reconnector`]: WebSocket session that reconnects with backoff and
//!   queues outbound messages while disconnected
//! - [`idle`]: reviewer heartbeat that switches itself off after inactivity
//! - [`token`]: where the client gets its access token from
//! - [`queue`]: bounded outbound queue
//! - [`url`]: relay URL normalization

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod idle;
pub mod queue;
pub mod reconnector;
pub mod token;
pub mod url;

pub use config::ClientConfig;
pub use errors::ClientError;
pub use reconnector::{ClientHandle, ConnectionStatus, ReconnectingClient};
pub use token::{SharedToken, StaticToken, TokenSource};
