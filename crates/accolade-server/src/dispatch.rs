//! Relay dispatcher: turns change events into notifications for the
//! sessions that care about them.
//!
//! Each live connection is evaluated once per event, so a session matching
//! more than one rule still receives a single message. A failed send is
//! counted and skipped; the fan-out always reaches every other recipient.

use std::sync::Arc;

use accolade_core::{Channel, ChangeEvent, Identity, Operation, Role, ServerMessage};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::metrics::{NOTIFICATIONS_DELIVERED_TOTAL, NOTIFICATIONS_DROPPED_TOTAL};
use crate::websocket::connection::ClientConnection;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::state::Session;

/// Result of one fan-out pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Sessions that matched.
    pub recipients: usize,
    /// Messages accepted by a session's outbound queue.
    pub delivered: usize,
    /// Messages lost to a full or closed queue.
    pub dropped: usize,
}

/// Outbound message for `event`, or `None` when nobody is notified about it.
pub fn message_for(event: &ChangeEvent) -> Option<ServerMessage> {
    if !event.is_achievement() {
        return None;
    }
    let data = event.new_row.clone();
    Some(match event.operation {
        Operation::Insert => ServerMessage::NewSubmission { data },
        Operation::Update => ServerMessage::AchievementUpdated { data },
    })
}

/// Whether a session should receive `event`.
pub fn is_recipient(session: &Session, event: &ChangeEvent) -> bool {
    let Some(identity) = session.identity() else {
        return false;
    };
    let subscribed = session.is_subscribed(Channel::Achievements);
    match (event.operation, identity.role) {
        (Operation::Insert, Role::Reviewer) => subscribed,
        (Operation::Insert, Role::Student) => false,
        (Operation::Update, Role::Reviewer) => subscribed || owns(identity, event),
        (Operation::Update, Role::Student) => owns(identity, event),
    }
}

fn owns(identity: &Identity, event: &ChangeEvent) -> bool {
    event.owner_id() == Some(identity.user_id.as_str())
}

/// Fans events out to connected sessions.
pub struct RelayDispatcher {
    connections: Arc<ConnectionRegistry>,
}

impl RelayDispatcher {
    /// Create a dispatcher over `connections`.
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    /// Deliver `event` to every interested session.
    #[instrument(skip_all, fields(table = %event.table, operation = event.operation.as_str()))]
    pub async fn dispatch(&self, event: &ChangeEvent) -> DispatchOutcome {
        let Some(message) = message_for(event) else {
            debug!("no notification for this table");
            return DispatchOutcome::default();
        };
        let recipients: Vec<Arc<ClientConnection>> = self
            .connections
            .snapshot()
            .await
            .into_iter()
            .filter(|conn| is_recipient(&conn.session(), event))
            .collect();

        let outcome = deliver(&recipients, &message);
        debug!(
            event_type = message.kind(),
            recipients = outcome.recipients,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "dispatched change event"
        );
        outcome
    }

    /// Push `new_submission{data}` to every connection authenticated as `user_id`.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn notify_user(&self, user_id: &str, data: Value) -> DispatchOutcome {
        let recipients = self.connections.user_connections(user_id).await;
        let outcome = deliver(&recipients, &ServerMessage::NewSubmission { data });
        debug!(
            recipients = outcome.recipients,
            delivered = outcome.delivered,
            "direct notification"
        );
        outcome
    }
}

fn deliver(recipients: &[Arc<ClientConnection>], message: &ServerMessage) -> DispatchOutcome {
    let mut outcome = DispatchOutcome {
        recipients: recipients.len(),
        ..DispatchOutcome::default()
    };
    if recipients.is_empty() {
        return outcome;
    }
    let json = match message.to_json() {
        Ok(j) => Arc::new(j),
        Err(e) => {
            warn!(event_type = message.kind(), error = %e, "failed to serialize notification");
            outcome.dropped = recipients.len();
            return outcome;
        }
    };
    for conn in recipients {
        let delivery = conn.send(json.clone());
        if delivery.is_queued() {
            outcome.delivered += 1;
        } else {
            outcome.dropped += 1;
            warn!(conn_id = %conn.id, event_type = message.kind(), ?delivery, "notification dropped");
        }
    }
    counter!(NOTIFICATIONS_DELIVERED_TOTAL, "kind" => message.kind())
        .increment(outcome.delivered as u64);
    if outcome.dropped > 0 {
        counter!(NOTIFICATIONS_DROPPED_TOTAL).increment(outcome.dropped as u64);
    }
    outcome
}
