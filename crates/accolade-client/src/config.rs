//! Client configuration.

use std::time::Duration;

use accolade_core::backoff::Backoff;
use accolade_settings::ClientSettings;

/// Reconnector and presence beacon configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Relay URL (`http`, `https`, `ws` or `wss`).
    pub url: String,
    /// First reconnect delay.
    pub backoff_floor: Duration,
    /// Longest reconnect delay.
    pub backoff_ceiling: Duration,
    /// Frames kept while disconnected.
    pub queue_limit: usize,
    /// Reviewer heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Inactivity after which the beacon closes the client.
    pub idle_timeout: Duration,
}

impl ClientConfig {
    /// Defaults pointed at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Fresh backoff for this configuration.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_floor, self.backoff_ceiling)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(s: &ClientSettings) -> Self {
        Self {
            url: s.url.clone(),
            backoff_floor: Duration::from_millis(s.backoff_floor_ms),
            backoff_ceiling: Duration::from_millis(s.backoff_ceiling_ms),
            queue_limit: s.queue_limit,
            heartbeat_interval: Duration::from_secs(s.heartbeat_interval_secs.max(1)),
            idle_timeout: Duration::from_secs(s.idle_timeout_secs),
        }
    }
}
