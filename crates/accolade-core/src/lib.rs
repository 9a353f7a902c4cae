//! # accolade-core
//!
//! Shared building blocks for the Accolade notification relay.
//!
//! - [`protocol`]: JSON wire messages exchanged over the relay socket
//! - [`identity`]: verified user identity and the closed set of roles
//! - [`events`]: row change events emitted by the backing store
//! - [`errors`]: error taxonomy surfaced to clients
//! - [`backoff`]: exponential reconnect backoff
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod events;
pub mod identity;
pub mod logging;
pub mod protocol;

pub use errors::RelayError;
pub use events::{ACHIEVEMENTS_TABLE, ChangeEvent, Operation};
pub use identity::{Identity, Role};
pub use protocol::{Channel, ClientMessage, PresenceView, ServerMessage};
