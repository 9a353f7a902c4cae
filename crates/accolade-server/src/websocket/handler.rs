//! WebSocket message handling: parses a client frame, applies it to the
//! connection's session, and produces the reply.

use std::sync::Arc;

use accolade_core::protocol::parse_client_message;
use accolade_core::{Channel, ClientMessage, RelayError, Role, ServerMessage};
use metrics::counter;
use tracing::{debug, info, instrument, warn};

use crate::identity::IdentityVerifier;
use crate::metrics::{AUTH_ATTEMPTS_TOTAL, WS_MESSAGES_TOTAL};
use crate::presence::PresenceRegistry;

use super::connection::ClientConnection;

/// Collaborators shared by every session.
pub struct RelayContext {
    /// Online reviewers.
    pub presence: Arc<PresenceRegistry>,
    /// Token verification, already wrapped with a timeout.
    pub verifier: Arc<dyn IdentityVerifier>,
}

/// Handle one inbound text frame.
///
/// Returns the reply to send, or `None` when the message has no reply
/// (`ping`) or the connection closed while the message was in flight.
#[instrument(skip_all, fields(conn_id = %conn.id, kind))]
pub async fn handle_message(
    text: &str,
    conn: &ClientConnection,
    ctx: &RelayContext,
) -> Option<ServerMessage> {
    let message = match parse_client_message(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "malformed client message");
            counter!(WS_MESSAGES_TOTAL, "kind" => "malformed").increment(1);
            return Some(failure_reply(&e));
        }
    };
    let _ = tracing::Span::current().record("kind", message.kind());
    counter!(WS_MESSAGES_TOTAL, "kind" => message.kind()).increment(1);

    match message {
        ClientMessage::Authenticate { token } => authenticate(token, conn, ctx).await,
        ClientMessage::SubscribeAchievements => Some(subscribe(conn, Channel::Achievements)),
        ClientMessage::ListTeachers => Some(ServerMessage::TeachersOnline {
            teachers: ctx.presence.views(),
        }),
        ClientMessage::Ping => {
            heartbeat(conn, ctx);
            None
        }
    }
}

async fn authenticate(
    token: Option<String>,
    conn: &ClientConnection,
    ctx: &RelayContext,
) -> Option<ServerMessage> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        counter!(AUTH_ATTEMPTS_TOTAL, "outcome" => "missing_token").increment(1);
        return Some(ServerMessage::auth_error("Missing token"));
    };

    let verified = tokio::select! {
        result = ctx.verifier.verify(&token) => result,
        () = conn.closed() => {
            debug!("connection closed during verification, result discarded");
            return None;
        }
    };
    if conn.is_closed() {
        return None;
    }

    let identity = match verified {
        Ok(identity) => identity,
        Err(e) => {
            let err = RelayError::from(e);
            warn!(error = %err, "authentication failed");
            counter!(AUTH_ATTEMPTS_TOTAL, "outcome" => err.label()).increment(1);
            return Some(failure_reply(&err));
        }
    };

    let previous = conn.authenticate(identity.clone());
    if let Some(prev) = previous {
        let same_reviewer = prev.user_id == identity.user_id && identity.role.is_reviewer();
        if prev.role.is_reviewer() && !same_reviewer {
            let _ = ctx.presence.remove_owned(&prev.user_id, &conn.id);
        }
    }
    match identity.role {
        Role::Reviewer => {
            let _ = ctx.presence.upsert(&identity, &conn.id);
            info!(user_id = %identity.user_id, "reviewer online");
        }
        Role::Student => {
            debug!(user_id = %identity.user_id, "student authenticated");
        }
    }
    counter!(AUTH_ATTEMPTS_TOTAL, "outcome" => "ok").increment(1);

    Some(ServerMessage::Authenticated {
        user_id: identity.user_id,
        role: identity.role,
    })
}

fn subscribe(conn: &ClientConnection, channel: Channel) -> ServerMessage {
    match conn.subscribe(channel) {
        Ok(added) => {
            debug!(channel = channel.as_str(), added, "subscribed");
            ServerMessage::Subscribed { channel }
        }
        Err(e) => failure_reply(&e),
    }
}

/// Client-facing reply for a failed request: `auth_error` for
/// authentication failures, generic `error` otherwise.
pub(crate) fn failure_reply(err: &RelayError) -> ServerMessage {
    if err.is_auth_failure() {
        ServerMessage::auth_error(err.client_message())
    } else {
        ServerMessage::error(err.client_message())
    }
}

/// Reviewer heartbeat. Ignored for everyone else.
fn heartbeat(conn: &ClientConnection, ctx: &RelayContext) {
    let Some(identity) = conn.identity() else {
        return;
    };
    match identity.role {
        Role::Reviewer => {
            if !ctx.presence.touch(&identity.user_id) {
                debug!(user_id = %identity.user_id, "heartbeat for reviewer without presence entry");
            }
        }
        Role::Student => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use accolade_core::Identity;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use crate::identity::IdentityError;
    use crate::websocket::state::SessionState;

    struct TableVerifier(HashMap<&'static str, Identity>);

    #[async_trait]
    impl IdentityVerifier for TableVerifier {
        async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
            self.0
                .get(token)
                .cloned()
                .ok_or(IdentityError::Rejected { status: 401 })
        }
    }

    struct SlowVerifier;

    #[async_trait]
    impl IdentityVerifier for SlowVerifier {
        async fn verify(&self, _token: &str) -> Result<Identity, IdentityError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Identity::new("T9", Role::Reviewer, None))
        }
    }

    fn context() -> RelayContext {
        let mut table = HashMap::new();
        let _ = table.insert(
            "tok-t1",
            Identity::new("T1", Role::Reviewer, Some("Dr. Rao".into())),
        );
        let _ = table.insert("tok-t2", Identity::new("T2", Role::Reviewer, None));
        let _ = table.insert("tok-s1", Identity::new("S1", Role::Student, None));
        RelayContext {
            presence: Arc::new(PresenceRegistry::new()),
            verifier: Arc::new(TableVerifier(table)),
        }
    }

    fn connection(id: &str) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(32);
        (ClientConnection::new(id.into(), tx), rx)
    }

    #[tokio::test]
    async fn reviewer_authenticates_and_appears_in_presence() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        let reply = handle_message(r#"{"type":"authenticate","token":"tok-t1"}"#, &conn, &ctx).await;
        assert_matches!(
            reply,
            Some(ServerMessage::Authenticated { ref user_id, role: Role::Reviewer }) if user_id == "T1"
        );
        assert!(ctx.presence.contains("T1"));
        assert_eq!(conn.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn student_does_not_enter_presence() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        let reply = handle_message(r#"{"type":"authenticate","token":"tok-s1"}"#, &conn, &ctx).await;
        assert_matches!(reply, Some(ServerMessage::Authenticated { role: Role::Student, .. }));
        assert!(ctx.presence.is_empty());
    }

    #[tokio::test]
    async fn invalid_token_leaves_state_untouched() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        let reply = handle_message(r#"{"type":"authenticate","token":"bogus"}"#, &conn, &ctx).await;
        assert_eq!(reply, Some(ServerMessage::auth_error("Invalid token")));
        assert_eq!(conn.state(), SessionState::Unauthenticated);
        assert!(ctx.presence.is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_auth_error() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        let reply = handle_message(r#"{"type":"authenticate"}"#, &conn, &ctx).await;
        assert_matches!(reply, Some(ServerMessage::AuthError { .. }));
        let reply = handle_message(r#"{"type":"authenticate","token":""}"#, &conn, &ctx).await;
        assert_matches!(reply, Some(ServerMessage::AuthError { .. }));
    }

    #[tokio::test]
    async fn malformed_message_gets_generic_error() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        for bad in ["not json", r#"{"type":"launch_rockets"}"#, "{}"] {
            let reply = handle_message(bad, &conn, &ctx).await;
            assert_eq!(reply, Some(ServerMessage::error("Invalid message format")));
        }
    }

    #[tokio::test]
    async fn subscribe_before_auth_is_rejected() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        let reply = handle_message(r#"{"type":"subscribe_achievements"}"#, &conn, &ctx).await;
        assert_eq!(reply, Some(ServerMessage::error("Authentication required")));
        assert_eq!(conn.state(), SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn subscribe_twice_acknowledges_twice() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        let _ = handle_message(r#"{"type":"authenticate","token":"tok-t1"}"#, &conn, &ctx).await;
        for _ in 0..2 {
            let reply = handle_message(r#"{"type":"subscribe_achievements"}"#, &conn, &ctx).await;
            assert_eq!(
                reply,
                Some(ServerMessage::Subscribed {
                    channel: Channel::Achievements
                })
            );
        }
        assert_eq!(conn.state(), SessionState::Subscribed);
    }

    #[tokio::test]
    async fn list_teachers_works_unauthenticated() {
        let ctx = context();
        let (reviewer, _rx1) = connection("c1");
        let (anon, _rx2) = connection("c2");
        let _ = handle_message(r#"{"type":"authenticate","token":"tok-t1"}"#, &reviewer, &ctx).await;

        let reply = handle_message(r#"{"type":"list_teachers"}"#, &anon, &ctx).await;
        let Some(ServerMessage::TeachersOnline { teachers }) = reply else {
            panic!("expected teachers_online");
        };
        assert_eq!(teachers.len(), 1);
        assert_eq!(teachers[0].user_id, "T1");
        assert_eq!(teachers[0].full_name, "Dr. Rao");
    }

    #[tokio::test]
    async fn ping_has_no_reply() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        assert!(handle_message(r#"{"type":"ping"}"#, &conn, &ctx).await.is_none());
        let _ = handle_message(r#"{"type":"authenticate","token":"tok-t1"}"#, &conn, &ctx).await;
        assert!(handle_message(r#"{"type":"ping"}"#, &conn, &ctx).await.is_none());
        assert!(ctx.presence.contains("T1"));
    }

    #[tokio::test]
    async fn reauth_as_other_reviewer_moves_presence() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        let _ = handle_message(r#"{"type":"authenticate","token":"tok-t1"}"#, &conn, &ctx).await;
        let _ = handle_message(r#"{"type":"authenticate","token":"tok-t2"}"#, &conn, &ctx).await;
        assert!(!ctx.presence.contains("T1"));
        assert!(ctx.presence.contains("T2"));
        assert_eq!(ctx.presence.len(), 1);
    }

    #[tokio::test]
    async fn reauth_as_same_reviewer_keeps_one_entry() {
        let ctx = context();
        let (conn, _rx) = connection("c1");
        let _ = handle_message(r#"{"type":"authenticate","token":"tok-t1"}"#, &conn, &ctx).await;
        let _ = handle_message(r#"{"type":"authenticate","token":"tok-t1"}"#, &conn, &ctx).await;
        assert_eq!(ctx.presence.len(), 1);
    }

    #[test]
    fn failure_reply_picks_message_kind() {
        assert_eq!(
            failure_reply(&RelayError::Authentication("backend returned 401".into())),
            ServerMessage::auth_error("Invalid token")
        );
        assert_eq!(
            failure_reply(&RelayError::Timeout(10_000)),
            ServerMessage::auth_error("Authentication timed out")
        );
        assert_eq!(
            failure_reply(&RelayError::MalformedMessage("eof".into())),
            ServerMessage::error("Invalid message format")
        );
        assert_eq!(
            failure_reply(&RelayError::NotAuthenticated),
            ServerMessage::error("Authentication required")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn verification_result_discarded_after_close() {
        let ctx = RelayContext {
            presence: Arc::new(PresenceRegistry::new()),
            verifier: Arc::new(SlowVerifier),
        };
        let conn = Arc::new(connection("c1").0);

        let task = {
            let conn = conn.clone();
            let ctx = Arc::new(ctx);
            let presence = ctx.presence.clone();
            let handle = tokio::spawn(async move {
                handle_message(r#"{"type":"authenticate","token":"slow"}"#, &conn, &ctx).await
            });
            (handle, presence)
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        conn.close();

        let (handle, presence) = task;
        assert!(handle.await.unwrap().is_none());
        assert!(presence.is_empty());
        assert!(conn.identity().is_none());
    }
}
