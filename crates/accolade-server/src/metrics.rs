//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup; a second install fails.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrades refused because the server was full (counter).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Client messages handled (counter, labels: kind).
pub const WS_MESSAGES_TOTAL: &str = "ws_messages_total";
/// Authentication attempts (counter, labels: outcome).
pub const AUTH_ATTEMPTS_TOTAL: &str = "auth_attempts_total";
/// Identity verification latency (histogram).
pub const AUTH_VERIFY_DURATION_SECONDS: &str = "auth_verify_duration_seconds";
/// Change events received (counter, labels: operation).
pub const CHANGE_EVENTS_TOTAL: &str = "change_events_total";
/// Change events skipped because the bridge lagged (counter).
pub const CHANGE_EVENTS_LAGGED_TOTAL: &str = "change_events_lagged_total";
/// Notifications delivered to sessions (counter, labels: kind).
pub const NOTIFICATIONS_DELIVERED_TOTAL: &str = "notifications_delivered_total";
/// Notifications dropped on full or closed queues (counter).
pub const NOTIFICATIONS_DROPPED_TOTAL: &str = "notifications_dropped_total";
/// Reviewers online (gauge).
pub const PRESENCE_ONLINE: &str = "presence_online";
/// Presence entries removed by the stale sweep (counter).
pub const PRESENCE_PRUNED_TOTAL: &str = "presence_pruned_total";
