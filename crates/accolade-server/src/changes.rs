//! Change event ingestion.
//!
//! The backing store posts database-webhook payloads to `/changes`. They are
//! converted to [`ChangeEvent`]s, published on the [`ChangeFeed`], and the
//! [`ChangeBridge`] hands them to the dispatcher one at a time.

use std::sync::Arc;

use accolade_core::{ChangeEvent, Operation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::RelayDispatcher;
use crate::metrics::{CHANGE_EVENTS_LAGGED_TOTAL, CHANGE_EVENTS_TOTAL};

/// In-process stream of change events.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    /// Feed buffering up to `capacity` events per lagging consumer.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Returns how many consumers will see it.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        counter!(CHANGE_EVENTS_TOTAL, "operation" => event.operation.as_str()).increment(1);
        self.tx.send(event).unwrap_or(0)
    }

    /// New consumer, starting at the next published event.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

/// Database webhook body: `{type, table, schema, record, old_record}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseWebhook {
    /// `INSERT`, `UPDATE`, or `DELETE`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Table name.
    pub table: String,
    /// Schema name.
    #[serde(default)]
    pub schema: Option<String>,
    /// New row.
    #[serde(default)]
    pub record: Option<Value>,
    /// Previous row on update.
    #[serde(default)]
    pub old_record: Option<Value>,
}

impl DatabaseWebhook {
    /// Convert to a [`ChangeEvent`]. `None` for deletes, unknown types, or a
    /// missing `record`.
    pub fn into_change_event(self) -> Option<ChangeEvent> {
        let operation = Operation::from_webhook(&self.kind)?;
        let new_row = self.record.filter(|r| !r.is_null())?;
        Some(match operation {
            Operation::Insert => ChangeEvent::insert(self.table, new_row),
            Operation::Update => ChangeEvent::update(self.table, new_row, self.old_record),
        })
    }
}

/// Feeds change events to the dispatcher in emission order.
pub struct ChangeBridge {
    rx: broadcast::Receiver<ChangeEvent>,
    dispatcher: Arc<RelayDispatcher>,
    cancel: CancellationToken,
}

impl ChangeBridge {
    /// Create a bridge reading from `rx`.
    pub fn new(
        rx: broadcast::Receiver<ChangeEvent>,
        dispatcher: Arc<RelayDispatcher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            rx,
            dispatcher,
            cancel,
        }
    }

    /// Run until the feed closes or `cancel` fires.
    #[tracing::instrument(skip_all, name = "change_bridge")]
    pub async fn run(mut self) {
        loop {
            let received = tokio::select! {
                () = self.cancel.cancelled() => break,
                r = self.rx.recv() => r,
            };
            match received {
                Ok(event) => {
                    debug!(table = %event.table, operation = event.operation.as_str(), "bridging change event");
                    let _ = self.dispatcher.dispatch(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    counter!(CHANGE_EVENTS_LAGGED_TOTAL).increment(n);
                    warn!(lagged = n, "change bridge lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("change feed closed, exiting");
                    break;
                }
            }
        }
    }
}
