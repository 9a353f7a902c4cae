//! End-to-end integration tests using a real WebSocket client.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use accolade_core::{ACHIEVEMENTS_TABLE, ChangeEvent, Identity, Role};
use accolade_server::config::ServerConfig;
use accolade_server::identity::{IdentityError, IdentityVerifier};
use accolade_server::server::{RelayServer, ServerHandle};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Token `tok-<id>` resolves to `<id>`; ids starting with `T` are reviewers.
struct FakeVerifier {
    slow: HashMap<String, Duration>,
}

#[async_trait]
impl IdentityVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
        if let Some(delay) = self.slow.get(token) {
            tokio::time::sleep(*delay).await;
        }
        let id = token
            .strip_prefix("tok-")
            .ok_or(IdentityError::Rejected { status: 401 })?;
        let role = if id.starts_with('T') {
            Role::Reviewer
        } else {
            Role::Student
        };
        Ok(Identity::new(id, role, Some(format!("User {id}"))))
    }
}

struct Relay {
    server: RelayServer,
    handle: ServerHandle,
    ws_url: String,
    http_url: String,
}

async fn boot_with(config: ServerConfig, slow: HashMap<String, Duration>) -> Relay {
    let server = RelayServer::new(config, Arc::new(FakeVerifier { slow }));
    let handle = server.listen().await.unwrap();
    let addr = handle.addr;
    Relay {
        server,
        handle,
        ws_url: format!("ws://{addr}/ws"),
        http_url: format!("http://{addr}"),
    }
}

async fn boot() -> Relay {
    boot_with(ServerConfig::default(), HashMap::new()).await
}

async fn connect(url: &str) -> WsStream {
    let (mut ws, _) = connect_async(url).await.unwrap();
    let hello = read_json(&mut ws).await;
    assert_eq!(hello["type"], "connected");
    ws
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Try to read a JSON message within `dur`. Returns None on timeout.
async fn try_read_json(ws: &mut WsStream, dur: Duration) -> Option<Value> {
    timeout(dur, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str::<Value>(&text).ok(),
                Some(Ok(_)) => {}
                _ => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

async fn send(ws: &mut WsStream, msg: Value) {
    ws.send(Message::text(msg.to_string())).await.unwrap();
}

async fn authenticate(ws: &mut WsStream, user: &str) -> Value {
    send(ws, json!({"type": "authenticate", "token": format!("tok-{user}")})).await;
    read_json(ws).await
}

async fn subscribe(ws: &mut WsStream) -> Value {
    send(ws, json!({"type": "subscribe_achievements"})).await;
    read_json(ws).await
}

async fn reviewer_session(relay: &Relay, user: &str) -> WsStream {
    let mut ws = connect(&relay.ws_url).await;
    let auth = authenticate(&mut ws, user).await;
    assert_eq!(auth["type"], "authenticated");
    assert_eq!(subscribe(&mut ws).await["type"], "subscribed");
    ws
}

async fn http_teachers(relay: &Relay) -> Vec<Value> {
    let body: Value = reqwest::get(format!("{}/ws?type=list_teachers", relay.http_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["type"], "teachers_online");
    body["teachers"].as_array().cloned().unwrap_or_default()
}

async fn wait_for_teacher_count(relay: &Relay, expected: usize) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        let teachers = http_teachers(relay).await;
        if teachers.len() == expected || tokio::time::Instant::now() > deadline {
            return teachers;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_connected_on_connect() {
    let relay = boot().await;
    let (mut ws, _) = connect_async(&relay.ws_url).await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "connected");
    assert_eq!(msg["message"], "WebSocket connected");
    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_valid_token_authenticates_with_role() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;

    let msg = authenticate(&mut ws, "T1").await;
    assert_eq!(msg["type"], "authenticated");
    assert_eq!(msg["userId"], "T1");
    assert_eq!(msg["role"], "teacher");

    let mut student = connect(&relay.ws_url).await;
    let msg = authenticate(&mut student, "S1").await;
    assert_eq!(msg["role"], "student");
    assert!(try_read_json(&mut student, QUIET).await.is_none());

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_invalid_token_yields_one_auth_error() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;

    send(&mut ws, json!({"type": "authenticate", "token": "garbage"})).await;
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "auth_error");
    assert!(try_read_json(&mut ws, QUIET).await.is_none());

    // Still unauthenticated, connection still open
    assert_eq!(subscribe(&mut ws).await["type"], "error");
    assert!(http_teachers(&relay).await.is_empty());

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_malformed_message_keeps_connection_open() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;

    ws.send(Message::text("{not json")).await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["message"], "Invalid message format");

    let msg = authenticate(&mut ws, "S1").await;
    assert_eq!(msg["type"], "authenticated");

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_non_utf8_binary_frame_gets_error() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;

    ws.send(Message::binary(vec![0xff, 0xfe, 0x00])).await.unwrap();
    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "error");
    assert_eq!(msg["message"], "Invalid message format");

    let msg = authenticate(&mut ws, "S1").await;
    assert_eq!(msg["type"], "authenticated");

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_utf8_binary_frame_is_handled_as_text() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;

    let auth = json!({"type": "authenticate", "token": "tok-S1"}).to_string();
    ws.send(Message::binary(auth.into_bytes())).await.unwrap();
    assert_eq!(read_json(&mut ws).await["type"], "authenticated");

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_client_leaving_mid_verification_is_noticed() {
    let slow = HashMap::from([("tok-T1".to_string(), Duration::from_millis(1500))]);
    let relay = boot_with(ServerConfig::default(), slow).await;
    let mut ws = connect(&relay.ws_url).await;
    assert_eq!(relay.server.connections().connection_count().await, 1);

    send(&mut ws, json!({"type": "authenticate", "token": "tok-T1"})).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    ws.close(None).await.unwrap();
    drop(ws);

    // Well before the verification would finish
    let gone = timeout(Duration::from_millis(1000), async {
        while relay.server.connections().connection_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(gone.is_ok(), "session outlived its socket");

    // And the late result never lands in presence
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert!(relay.server.presence().is_empty());

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_presence_tracks_reviewer_sessions() {
    let relay = boot().await;
    let mut sessions = Vec::new();
    for id in ["T1", "T2", "T3"] {
        let mut ws = connect(&relay.ws_url).await;
        let _ = authenticate(&mut ws, id).await;
        sessions.push(ws);
    }
    let mut observer = connect(&relay.ws_url).await;
    send(&mut observer, json!({"type": "list_teachers"})).await;
    let msg = read_json(&mut observer).await;
    assert_eq!(msg["type"], "teachers_online");
    let ids: HashSet<String> = msg["teachers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["user_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ids.len(), 3);

    let mut gone = sessions.remove(0);
    gone.close(None).await.unwrap();
    drop(gone);

    let teachers = wait_for_teacher_count(&relay, 2).await;
    assert_eq!(teachers.len(), 2);
    assert!(teachers.iter().all(|t| t["user_id"] != "T1"));

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_reviewer_reconnect_not_evicted_by_old_socket() {
    let relay = boot().await;
    let mut old = connect(&relay.ws_url).await;
    let _ = authenticate(&mut old, "T1").await;
    let mut new = connect(&relay.ws_url).await;
    let _ = authenticate(&mut new, "T1").await;

    old.close(None).await.unwrap();
    drop(old);
    tokio::time::sleep(QUIET).await;

    let teachers = http_teachers(&relay).await;
    assert_eq!(teachers.len(), 1);
    assert_eq!(teachers[0]["user_id"], "T1");

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_subscribe_twice_delivers_once() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;
    let _ = authenticate(&mut ws, "T1").await;
    assert_eq!(subscribe(&mut ws).await["type"], "subscribed");
    let second = subscribe(&mut ws).await;
    assert_eq!(second["type"], "subscribed");
    assert_eq!(second["channel"], "achievements");

    let _ = relay
        .server
        .feed()
        .publish(ChangeEvent::insert(ACHIEVEMENTS_TABLE, json!({"id": 1})));

    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "new_submission");
    assert!(try_read_json(&mut ws, QUIET).await.is_none());

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_insert_fans_out_to_reviewers_only() {
    let relay = boot().await;
    let mut reviewers = Vec::new();
    for id in ["T1", "T2", "T3"] {
        reviewers.push(reviewer_session(&relay, id).await);
    }
    let mut student = connect(&relay.ws_url).await;
    let _ = authenticate(&mut student, "S1").await;
    let _ = subscribe(&mut student).await;

    let _ = relay.server.feed().publish(ChangeEvent::insert(
        ACHIEVEMENTS_TABLE,
        json!({"title": "Paper accepted", "student_id": "S1"}),
    ));

    for ws in &mut reviewers {
        let msg = read_json(ws).await;
        assert_eq!(msg["type"], "new_submission");
        assert_eq!(msg["data"]["title"], "Paper accepted");
    }
    assert!(try_read_json(&mut student, QUIET).await.is_none());

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_update_reaches_owner_and_reviewers() {
    let relay = boot().await;
    let mut owner = connect(&relay.ws_url).await;
    let _ = authenticate(&mut owner, "S1").await;
    let mut reviewer = reviewer_session(&relay, "T1").await;
    let mut unrelated = connect(&relay.ws_url).await;
    let _ = authenticate(&mut unrelated, "S2").await;

    let _ = relay.server.feed().publish(ChangeEvent::update(
        ACHIEVEMENTS_TABLE,
        json!({"student_id": "S1", "status": "approved"}),
        Some(json!({"student_id": "S1", "status": "pending"})),
    ));

    let msg = read_json(&mut owner).await;
    assert_eq!(msg["type"], "achievement_updated");
    assert_eq!(msg["data"]["status"], "approved");
    assert_eq!(read_json(&mut reviewer).await["type"], "achievement_updated");
    assert!(try_read_json(&mut unrelated, QUIET).await.is_none());

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_webhook_insert_delivered_exactly_once() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;
    assert_eq!(authenticate(&mut ws, "T1").await["type"], "authenticated");
    assert_eq!(subscribe(&mut ws).await["type"], "subscribed");

    let resp = reqwest::Client::new()
        .post(format!("{}/changes", relay.http_url))
        .json(&json!({
            "type": "INSERT",
            "table": "achievements",
            "schema": "public",
            "record": {"title": "Hackathon Winner", "student_id": "S9"},
            "old_record": null
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 202);

    let msg = read_json(&mut ws).await;
    assert_eq!(
        msg,
        json!({
            "type": "new_submission",
            "data": {"title": "Hackathon Winner", "student_id": "S9"}
        })
    );
    assert!(try_read_json(&mut ws, QUIET).await.is_none());

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_notify_pushes_to_connected_teacher() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;
    let _ = authenticate(&mut ws, "T7").await;

    let body: Value = reqwest::Client::new()
        .post(format!("{}/notify", relay.http_url))
        .json(&json!({"teacher_id": "T7", "data": {"achievement_id": 42}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"ok": true, "delivered": 1}));

    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "new_submission");
    assert_eq!(msg["data"]["achievement_id"], 42);

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_identity_timeout_reports_auth_error() {
    let config = ServerConfig {
        identity_timeout_ms: 200,
        ..ServerConfig::default()
    };
    let slow = HashMap::from([("tok-T1".to_string(), Duration::from_secs(30))]);
    let relay = boot_with(config, slow).await;
    let mut ws = connect(&relay.ws_url).await;

    let msg = authenticate(&mut ws, "T1").await;
    assert_eq!(msg["type"], "auth_error");
    assert_eq!(msg["message"], "Authentication timed out");
    assert!(http_teachers(&relay).await.is_empty());

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_health_counts_connections() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;
    let _ = authenticate(&mut ws, "T1").await;

    let health: Value = reqwest::get(format!("{}/health", relay.http_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["reviewers_online"], 1);

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_connection_limit_refuses_upgrade() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let relay = boot_with(config, HashMap::new()).await;
    let _first = connect(&relay.ws_url).await;
    assert!(connect_async(&relay.ws_url).await.is_err());
    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_concurrent_upgrades_respect_limit() {
    let config = ServerConfig {
        max_connections: 2,
        ..ServerConfig::default()
    };
    let relay = boot_with(config, HashMap::new()).await;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let url = relay.ws_url.clone();
            tokio::spawn(async move { connect_async(url).await.ok().map(|(ws, _)| ws) })
        })
        .collect();
    let mut open = Vec::new();
    for attempt in attempts {
        if let Some(ws) = attempt.await.unwrap() {
            open.push(ws);
        }
    }
    assert_eq!(open.len(), 2);
    assert_eq!(relay.server.open_slots(), 0);

    // Closing one session frees its slot
    let mut leaving = open.pop().unwrap();
    leaving.close(None).await.unwrap();
    drop(leaving);
    let freed = timeout(TIMEOUT, async {
        while relay.server.open_slots() == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(freed.is_ok());
    let _again = connect(&relay.ws_url).await;

    relay.handle.shutdown(None).await;
}

#[tokio::test]
async fn e2e_graceful_shutdown_closes_sessions() {
    let relay = boot().await;
    let mut ws = connect(&relay.ws_url).await;
    let _ = authenticate(&mut ws, "T1").await;

    relay.handle.shutdown(Some(Duration::from_secs(2))).await;
    assert!(relay.server.shutdown().is_draining());
    assert_eq!(relay.server.shutdown().tracked(), 0);

    let closed = timeout(Duration::from_secs(3), async {
        loop {
            match ws.next().await {
                None | Some(Err(_) | Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !relay.server.presence().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(relay.server.presence().is_empty());
}
