//! # accolade-server
//!
//! Real-time notification relay for the achievement tracker.
//!
//! - `WebSocket` gateway: per-client session state machine, ping/pong liveness
//! - Presence registry of online reviewers, readable over WS and plain HTTP
//! - Relay dispatcher: fans achievement change events out to interested sessions
//! - Change ingestion from the backing store's database webhooks
//! - Identity verification against the hosted auth backend, with a timeout
//! - Health, Prometheus metrics, graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod changes;
pub mod config;
pub mod dispatch;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod presence;
pub mod server;
pub mod shutdown;
pub mod websocket;
