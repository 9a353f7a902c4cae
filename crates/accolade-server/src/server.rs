//! `RelayServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use accolade_core::ServerMessage;
use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::changes::{ChangeBridge, ChangeFeed, DatabaseWebhook};
use crate::config::ServerConfig;
use crate::dispatch::RelayDispatcher;
use crate::health::HealthResponse;
use crate::identity::{IdentityVerifier, TimeoutVerifier};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::presence::{self, PresenceRegistry};
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::RelayContext;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub connections: Arc<ConnectionRegistry>,
    /// Session collaborators.
    pub ctx: Arc<RelayContext>,
    /// Fan-out for direct notifications.
    pub dispatcher: Arc<RelayDispatcher>,
    /// Inbound change events.
    pub feed: ChangeFeed,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Relay shutdown state.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// One permit per allowed connection, held for the session's lifetime.
    pub slots: Arc<Semaphore>,
}

/// The notification relay server.
pub struct RelayServer {
    config: Arc<ServerConfig>,
    connections: Arc<ConnectionRegistry>,
    ctx: Arc<RelayContext>,
    dispatcher: Arc<RelayDispatcher>,
    feed: ChangeFeed,
    shutdown: Arc<ShutdownCoordinator>,
    slots: Arc<Semaphore>,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a new server. `verifier` is wrapped with the configured timeout.
    pub fn new(config: ServerConfig, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let ctx = Arc::new(RelayContext {
            presence: Arc::new(PresenceRegistry::new()),
            verifier: Arc::new(TimeoutVerifier::new(verifier, config.identity_timeout())),
        });
        let slots = Arc::new(Semaphore::new(
            config.max_connections.min(Semaphore::MAX_PERMITS),
        ));
        Self {
            dispatcher: Arc::new(RelayDispatcher::new(connections.clone())),
            feed: ChangeFeed::new(config.change_channel_capacity),
            config: Arc::new(config),
            connections,
            ctx,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            slots,
            start_time: Instant::now(),
            metrics: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            connections: self.connections.clone(),
            ctx: self.ctx.clone(),
            dispatcher: self.dispatcher.clone(),
            feed: self.feed.clone(),
            config: self.config.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.clone(),
            slots: self.slots.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/notify", post(notify_handler))
            .route("/changes", post(changes_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Start the change bridge and presence sweeper; both are tracked for
    /// shutdown.
    pub fn spawn_background(&self) {
        let bridge = ChangeBridge::new(
            self.feed.subscribe(),
            self.dispatcher.clone(),
            self.shutdown.token(),
        );
        let sweeper = presence::spawn_sweeper(
            self.ctx.presence.clone(),
            self.config.presence_stale_after(),
            self.config.presence_sweep_interval(),
            self.shutdown.token(),
        );
        self.shutdown.track("change_bridge", tokio::spawn(bridge.run()));
        self.shutdown.track("presence_sweeper", sweeper);
    }

    /// Bind, start background tasks, and serve until shutdown.
    pub async fn listen(&self) -> Result<ServerHandle, std::io::Error> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;

        self.spawn_background();
        let router = self.router();
        let token = self.shutdown.token();
        let http: JoinHandle<()> = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        self.shutdown.track("http", http);

        info!(%addr, "relay listening");
        Ok(ServerHandle {
            addr,
            shutdown: self.shutdown.clone(),
            connections: self.connections.clone(),
        })
    }

    /// Live connections.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Presence registry.
    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.ctx.presence
    }

    /// Dispatcher.
    pub fn dispatcher(&self) -> &Arc<RelayDispatcher> {
        &self.dispatcher
    }

    /// Change feed; publish here to notify sessions.
    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Connection slots not currently held by a session.
    pub fn open_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Handle returned by [`RelayServer::listen`].
pub struct ServerHandle {
    /// Bound address.
    pub addr: SocketAddr,
    shutdown: Arc<ShutdownCoordinator>,
    connections: Arc<ConnectionRegistry>,
}

impl ServerHandle {
    /// Stop accepting, close every session, and wait for background tasks.
    pub async fn shutdown(self, timeout: Option<Duration>) {
        self.shutdown.trigger();
        self.connections.close_all().await;
        let _ = self.shutdown.drain(timeout).await;
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// GET /ws: WebSocket upgrade, or the plain-HTTP presence listing.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(_) if query.kind.as_deref() == Some("list_teachers") => {
            return Json(ServerMessage::TeachersOnline {
                teachers: state.ctx.presence.views(),
            })
            .into_response();
        }
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Expected WebSocket connection").into_response();
        }
    };

    if state.shutdown.is_draining() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server shutting down").into_response();
    }
    // Reserved before the upgrade so concurrent handshakes cannot overshoot
    let Ok(slot) = state.slots.clone().try_acquire_owned() else {
        warn!(
            max = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        counter!(WS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    let client_id = format!("client_{}", Uuid::now_v7());
    let session_config = SessionConfig {
        send_queue_capacity: state.config.send_queue_capacity,
        ping_interval: state.config.ping_interval(),
        pong_timeout: state.config.pong_timeout(),
    };
    let connections = state.connections.clone();
    let ctx = state.ctx.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            run_ws_session(socket, client_id, connections, ctx, session_config).await;
            drop(slot);
        })
        .into_response()
}

#[derive(Debug, Deserialize)]
struct NotifyRequest {
    #[serde(default)]
    teacher_id: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// POST /notify: push `new_submission` to one user's connections.
async fn notify_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NotifyRequest>,
) -> Response {
    if !authorized(&headers, state.config.webhook_secret.as_deref()) {
        return unauthorized();
    }
    let (Some(teacher_id), Some(data)) = (
        body.teacher_id.filter(|id| !id.is_empty()),
        body.data.filter(|d| !d.is_null()),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "error": "teacher_id and data are required"})),
        )
            .into_response();
    };
    let outcome = state.dispatcher.notify_user(&teacher_id, data).await;
    Json(json!({"ok": true, "delivered": outcome.delivered})).into_response()
}

/// POST /changes: database webhook ingestion.
async fn changes_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(hook): Json<DatabaseWebhook>,
) -> Response {
    if !authorized(&headers, state.config.webhook_secret.as_deref()) {
        return unauthorized();
    }
    let kind = hook.kind.clone();
    let table = hook.table.clone();
    let forwarded = match hook.into_change_event() {
        Some(event) => {
            let _ = state.feed.publish(event);
            true
        }
        None => {
            info!(kind = %kind, table = %table, "ignoring change webhook");
            false
        }
    };
    (
        StatusCode::ACCEPTED,
        Json(json!({"ok": true, "forwarded": forwarded})),
    )
        .into_response()
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.connections.connection_count().await;
    Json(HealthResponse::collect(
        state.start_time,
        state.shutdown.is_draining(),
        connections,
        state.ctx.presence.len(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

fn authorized(headers: &HeaderMap, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == secret)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"ok": false, "error": "unauthorized"})),
    )
        .into_response()
}
