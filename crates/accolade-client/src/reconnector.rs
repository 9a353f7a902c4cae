//! Reconnecting relay client.
//!
//! A single background task owns the socket. Callers talk to it through a
//! [`ClientHandle`]; server frames arrive on an mpsc receiver and the
//! connection status is published on a `watch` channel.
//!
//! Lifecycle: `connecting → open → closed → reconnecting → connecting …`.
//! A failed connect reports `error` instead of `open`. Only
//! [`ClientHandle::close`] ends the cycle.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use accolade_core::backoff::Backoff;
use accolade_core::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::queue::SendQueue;
use crate::token::TokenSource;
use crate::url::normalize_url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What [`ReconnectingClient::spawn`] hands back.
pub type Spawned = (
    ClientHandle,
    mpsc::UnboundedReceiver<ServerMessage>,
    watch::Receiver<ConnectionStatus>,
);

/// Observable connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Handshake in progress.
    Connecting,
    /// Socket usable; sends go straight out.
    Open,
    /// Socket gone. Terminal only after an explicit close.
    Closed,
    /// The last connect attempt failed.
    Error,
    /// Waiting out the backoff delay.
    Reconnecting,
}

impl ConnectionStatus {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Error => "error",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub(crate) enum Command {
    Send(String),
    Close,
}

/// Cloneable control handle for a running client.
#[derive(Clone, Debug)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    closed: Arc<AtomicBool>,
}

impl ClientHandle {
    /// Send a protocol message: written now if open, queued otherwise.
    pub fn send(&self, message: &ClientMessage) -> Result<(), ClientError> {
        let text = serde_json::to_string(message)?;
        self.send_text(text)
    }

    /// Send a pre-serialized frame.
    pub fn send_text(&self, text: String) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        self.commands
            .send(Command::Send(text))
            .map_err(|_| ClientError::Closed)
    }

    /// Close the socket and stop reconnecting. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Close);
        }
    }

    /// Whether [`close`](Self::close) was called or the client task ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.commands.is_closed()
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Wait until the client reports `status`.
    pub async fn wait_for(&self, status: ConnectionStatus) -> Result<(), ClientError> {
        let mut rx = self.status.clone();
        rx.wait_for(|s| *s == status)
            .await
            .map(|_| ())
            .map_err(|_| ClientError::Closed)
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (
        Self,
        mpsc::UnboundedReceiver<Command>,
        watch::Sender<ConnectionStatus>,
    ) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(ConnectionStatus::Open);
        let handle = Self {
            commands,
            status,
            closed: Arc::new(AtomicBool::new(false)),
        };
        (handle, rx, status_tx)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Socket lost; reconnect.
    Dropped,
    /// Caller asked to stop.
    Closed,
}

/// Background task driving one logical relay connection.
pub struct ReconnectingClient {
    url: String,
    backoff: Backoff,
    queue: SendQueue,
    token_source: Arc<dyn TokenSource>,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedSender<ServerMessage>,
    status: watch::Sender<ConnectionStatus>,
}

impl ReconnectingClient {
    /// Start connecting in the background.
    ///
    /// `token_source` is consulted on every open; a token, when present, is
    /// sent as `authenticate` before anything queued.
    pub fn spawn(
        config: &ClientConfig,
        token_source: Arc<dyn TokenSource>,
    ) -> Result<Spawned, ClientError> {
        let url = normalize_url(&config.url)?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let client = Self {
            url,
            backoff: config.backoff(),
            queue: SendQueue::new(config.queue_limit),
            token_source,
            commands: cmd_rx,
            inbound: inbound_tx,
            status: status_tx,
        };
        let _ = tokio::spawn(client.run());

        let handle = ClientHandle {
            commands: cmd_tx,
            status: status_rx.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        };
        Ok((handle, inbound_rx, status_rx))
    }

    fn set_status(&self, status: ConnectionStatus) {
        debug!(status = status.as_str(), "client status");
        let _ = self.status.send_replace(status);
    }

    #[instrument(skip_all, name = "relay_client", fields(url = %self.url))]
    async fn run(mut self) {
        loop {
            self.set_status(ConnectionStatus::Connecting);
            let Some(result) = self.connect().await else {
                break;
            };
            match result {
                Ok(ws) => {
                    self.backoff.reset();
                    self.set_status(ConnectionStatus::Open);
                    info!(queued = self.queue.len(), "connected to relay");
                    if self.run_open(ws).await == SessionEnd::Closed {
                        break;
                    }
                    self.set_status(ConnectionStatus::Closed);
                }
                Err(e) => {
                    warn!(error = %e, failures = self.backoff.failures(), "connect failed");
                    self.set_status(ConnectionStatus::Error);
                }
            }

            let delay = self.backoff.next_delay();
            self.set_status(ConnectionStatus::Reconnecting);
            info!(?delay, "reconnecting after delay");
            if !self.wait(delay).await {
                break;
            }
        }
        self.set_status(ConnectionStatus::Closed);
        info!(dropped = self.queue.dropped(), "relay client closed");
    }

    /// Apply a command received while no socket is open. `false` means stop.
    fn absorb(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Send(frame)) => {
                let _ = self.queue.push(frame);
                true
            }
            Some(Command::Close) | None => false,
        }
    }

    /// Handshake, queueing sends meanwhile. `None` if closed during it.
    async fn connect(&mut self) -> Option<Result<WsStream, tungstenite::Error>> {
        let connect = connect_async(self.url.clone());
        tokio::pin!(connect);
        loop {
            tokio::select! {
                result = &mut connect => return Some(result.map(|(ws, _)| ws)),
                cmd = self.commands.recv() => {
                    if !self.absorb(cmd) {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for `delay`, queueing sends meanwhile. `false` if closed.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                cmd = self.commands.recv() => {
                    if !self.absorb(cmd) {
                        return false;
                    }
                }
            }
        }
    }

    async fn run_open(&mut self, ws: WsStream) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        if let Some(token) = self.token_source.token().await {
            let auth = ClientMessage::Authenticate { token: Some(token) };
            match serde_json::to_string(&auth) {
                Ok(text) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        warn!(error = %e, "failed to send authenticate");
                        return SessionEnd::Dropped;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode authenticate"),
            }
        }

        while let Some(frame) = self.queue.pop() {
            if let Err(e) = sink.send(Message::text(frame.clone())).await {
                warn!(error = %e, "flush interrupted");
                self.queue.requeue(frame);
                return SessionEnd::Dropped;
            }
        }

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Send(frame)) => {
                        if let Err(e) = sink.send(Message::text(frame.clone())).await {
                            debug!(error = %e, "send failed, queueing for next connection");
                            self.queue.requeue(frame);
                            return SessionEnd::Dropped;
                        }
                    }
                    Some(Command::Close) | None => {
                        let _ = sink.close().await;
                        return SessionEnd::Closed;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.deliver(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "relay closed the connection");
                        return SessionEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "socket error");
                        return SessionEnd::Dropped;
                    }
                    None => return SessionEnd::Dropped,
                },
            }
        }
    }

    fn deliver(&self, text: &str) {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(message) => {
                if self.inbound.send(message).is_err() {
                    debug!("inbound receiver dropped");
                }
            }
            Err(e) => warn!(error = %e, "unrecognized server frame"),
        }
    }
}
