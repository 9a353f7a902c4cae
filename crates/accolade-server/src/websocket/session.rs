//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use accolade_core::{RelayError, ServerMessage};
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_MESSAGES_TOTAL,
};

use super::connection::ClientConnection;
use super::handler::{RelayContext, failure_reply, handle_message};
use super::registry::ConnectionRegistry;

/// Frames read ahead of the handler.
const INBOUND_BUFFER: usize = 32;

/// Transport settings for one session.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Outbound queue length.
    pub send_queue_capacity: usize,
    /// Interval between server-initiated Ping frames.
    pub ping_interval: Duration,
    /// How long to wait for a Pong before considering the client dead.
    pub pong_timeout: Duration,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Sends a `connected` message
/// 2. Applies incoming text frames to the session and replies; binary
///    frames that are not UTF-8 get a generic `error`
/// 3. Forwards outbound replies and notifications via the send channel
/// 4. Sends periodic Ping frames and disconnects unresponsive clients
/// 5. On exit removes this connection's presence entry and registry slot
#[instrument(skip_all, fields(client_id = %client_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    client_id: String,
    registry: Arc<ConnectionRegistry>,
    ctx: Arc<RelayContext>,
    config: SessionConfig,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_capacity.max(1));
    let connection = Arc::new(ClientConnection::new(client_id.clone(), send_tx));

    info!(client_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    registry.add(connection.clone()).await;

    if let Ok(json) = ServerMessage::connected().to_json() {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // Outbound forwarder with periodic Ping frames.
    let outbound_conn = connection.clone();
    let outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(config.ping_interval);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(Message::Text(Arc::unwrap_or_clone(text).into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if outbound_conn.is_unresponsive(config.pong_timeout) {
                        warn!("client unresponsive for {:?}, disconnecting", config.pong_timeout);
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = outbound_conn.closed() => break,
            }
        }
        outbound_conn.close();
    });

    // Inbound reader. Owns the stream so a close or EOF is noticed even
    // while a frame is still being handled.
    let (frame_tx, mut frame_rx) = mpsc::channel::<Message>(INBOUND_BUFFER);
    let reader_conn = connection.clone();
    let reader = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                msg = ws_rx.next() => msg,
                () = reader_conn.closed() => break,
            };
            match next {
                Some(Ok(Message::Close(_))) => {
                    info!(client_id = %reader_conn.id, "client sent close frame");
                    break;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => reader_conn.record_activity(),
                Some(Ok(msg)) => {
                    if frame_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    debug!(client_id = %reader_conn.id, error = %e, "socket read failed");
                    break;
                }
                None => break,
            }
        }
        reader_conn.close();
    });

    loop {
        let next = tokio::select! {
            msg = frame_rx.recv() => msg,
            () = connection.closed() => break,
        };
        let Some(msg) = next else { break };
        connection.record_activity();

        let reply = match msg {
            Message::Text(ref t) => handle_message(t.as_str(), &connection, &ctx).await,
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(text) => handle_message(text, &connection, &ctx).await,
                Err(e) => {
                    let err = RelayError::MalformedMessage(e.to_string());
                    warn!(client_id, len = data.len(), error = %err, "non-UTF8 binary frame");
                    counter!(WS_MESSAGES_TOTAL, "kind" => "malformed").increment(1);
                    Some(failure_reply(&err))
                }
            },
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        };

        if let Some(reply) = reply {
            let delivery = connection.send_message(&reply);
            if !delivery.is_queued() {
                info!(client_id, ?delivery, "reply not enqueued");
            }
        }
    }

    // Clean up
    connection.close();
    if let Some(identity) = connection.release() {
        if identity.role.is_reviewer() && ctx.presence.remove_owned(&identity.user_id, &client_id)
        {
            info!(client_id, user_id = %identity.user_id, "reviewer offline");
        }
    }
    let _ = registry.remove(&client_id).await;
    info!(
        client_id,
        dropped = connection.dropped(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    outbound.abort();
    reader.abort();
}
