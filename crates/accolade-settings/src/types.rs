//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may specify any subset of fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "identity": { "supabaseUrl": "https://project.supabase.co" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccoladeSettings {
    /// Relay network settings.
    pub server: ServerSettings,
    /// Identity verification backend.
    pub identity: IdentitySettings,
    /// Change event ingestion.
    pub changes: ChangeSettings,
    /// Presence registry policy.
    pub presence: PresenceSettings,
    /// Reconnecting client behavior.
    pub client: ClientSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl AccoladeSettings {
    /// Reject combinations that cannot work at runtime.
    pub fn validate(&self) -> Result<()> {
        let client = &self.client;
        if client.backoff_floor_ms == 0 {
            return Err(SettingsError::invalid("client.backoffFloorMs", "must be positive"));
        }
        if client.backoff_floor_ms > client.backoff_ceiling_ms {
            return Err(SettingsError::invalid(
                "client.backoffFloorMs",
                format!(
                    "{} exceeds client.backoffCeilingMs ({})",
                    client.backoff_floor_ms, client.backoff_ceiling_ms
                ),
            ));
        }
        let capacities = [
            ("client.queueLimit", client.queue_limit),
            ("server.sendQueueCapacity", self.server.send_queue_capacity),
            ("changes.channelCapacity", self.changes.channel_capacity),
        ];
        if let Some((field, _)) = capacities.iter().find(|(_, v)| *v == 0) {
            return Err(SettingsError::invalid(*field, "must be positive"));
        }
        Ok(())
    }
}

/// Relay network and transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue length.
    pub send_queue_capacity: usize,
    /// Interval between transport-level ping frames.
    pub ping_interval_secs: u64,
    /// Silence after which a socket is considered dead.
    pub pong_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_connections: 1000,
            max_message_size: 1024 * 1024,
            send_queue_capacity: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
        }
    }
}

/// Hosted auth/database backend used to verify tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Base URL of the backend (no trailing slash needed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supabase_url: Option<String>,
    /// Public API key sent with user lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Service key used to read profiles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_key: Option<String>,
    /// Upper bound on one verification, in milliseconds.
    pub timeout_ms: u64,
}

impl IdentitySettings {
    /// Verification timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            supabase_url: None,
            api_key: None,
            service_key: None,
            timeout_ms: 10_000,
        }
    }
}

/// Change event ingestion.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChangeSettings {
    /// Bearer secret required on `/changes` and `/notify` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    /// Buffered events before slow consumers lag.
    pub channel_capacity: usize,
}

impl Default for ChangeSettings {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            channel_capacity: 1024,
        }
    }
}

/// Presence registry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Entries without a heartbeat for this long are dropped.
    pub stale_after_secs: u64,
    /// How often the stale sweep runs.
    pub sweep_interval_secs: u64,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

/// Reconnecting client behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Relay URL; `http(s)` schemes are rewritten to `ws(s)`.
    pub url: String,
    /// First reconnect delay.
    pub backoff_floor_ms: u64,
    /// Maximum reconnect delay.
    pub backoff_ceiling_ms: u64,
    /// Messages kept while disconnected; oldest are dropped beyond this.
    pub queue_limit: usize,
    /// Reviewer heartbeat cadence.
    pub heartbeat_interval_secs: u64,
    /// Inactivity after which presence broadcasting is switched off.
    pub idle_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
            backoff_floor_ms: 1000,
            backoff_ceiling_ms: 30_000,
            queue_limit: 256,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
