//! Server configuration.

use std::time::Duration;

use accolade_settings::AccoladeSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for the relay server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Outbound queue length per connection.
    pub send_queue_capacity: usize,
    /// Transport ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Disconnect after this many seconds without a pong.
    pub pong_timeout_secs: u64,
    /// Identity verification timeout in milliseconds.
    pub identity_timeout_ms: u64,
    /// Bearer secret for `/changes` and `/notify`.
    pub webhook_secret: Option<String>,
    /// Buffered change events.
    pub change_channel_capacity: usize,
    /// Presence entries older than this are swept.
    pub presence_stale_secs: u64,
    /// Presence sweep cadence.
    pub presence_sweep_secs: u64,
}

impl ServerConfig {
    /// Transport ping interval.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    /// Liveness timeout.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Identity verification timeout.
    pub fn identity_timeout(&self) -> Duration {
        Duration::from_millis(self.identity_timeout_ms)
    }

    /// Presence idle threshold.
    pub fn presence_stale_after(&self) -> Duration {
        Duration::from_secs(self.presence_stale_secs)
    }

    /// Presence sweep interval.
    pub fn presence_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.presence_sweep_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 1000,
            max_message_size: 1024 * 1024, // 1 MB
            send_queue_capacity: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
            identity_timeout_ms: 10_000,
            webhook_secret: None,
            change_channel_capacity: 1024,
            presence_stale_secs: 600,
            presence_sweep_secs: 60,
        }
    }
}

impl From<&AccoladeSettings> for ServerConfig {
    fn from(s: &AccoladeSettings) -> Self {
        Self {
            host: s.server.host.clone(),
            port: s.server.port,
            max_connections: s.server.max_connections,
            max_message_size: s.server.max_message_size,
            send_queue_capacity: s.server.send_queue_capacity,
            ping_interval_secs: s.server.ping_interval_secs,
            pong_timeout_secs: s.server.pong_timeout_secs,
            identity_timeout_ms: s.identity.timeout_ms,
            webhook_secret: s.changes.webhook_secret.clone(),
            change_channel_capacity: s.changes.channel_capacity,
            presence_stale_secs: s.presence.stale_after_secs,
            presence_sweep_secs: s.presence.sweep_interval_secs,
        }
    }
}
