//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

/// Coarse relay state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting connections.
    Ok,
    /// Shutdown has begun; new sockets will be refused.
    Draining,
}

/// Live relay counters.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok` or `draining`.
    pub status: HealthStatus,
    /// Crate version of the running binary.
    pub version: &'static str,
    /// Seconds since the relay started.
    pub uptime_secs: u64,
    /// Open WebSocket sessions of any role.
    pub connections: usize,
    /// Entries in the presence registry.
    pub reviewers_online: usize,
}

impl HealthResponse {
    /// Snapshot the counters.
    pub fn collect(
        started: Instant,
        draining: bool,
        connections: usize,
        reviewers_online: usize,
    ) -> Self {
        Self {
            status: if draining {
                HealthStatus::Draining
            } else {
                HealthStatus::Ok
            },
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: started.elapsed().as_secs(),
            connections,
            reviewers_online,
        }
    }
}
