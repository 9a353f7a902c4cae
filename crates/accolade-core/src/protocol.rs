//! Relay wire protocol.
//!
//! Every frame is a JSON object discriminated by a `type` field. Field
//! spellings follow what the web client already reads (`userId` on
//! `authenticated`, snake_case everywhere else).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RelayError;
use crate::identity::Role;

/// Named change stream a session can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Inserts and updates on the achievements table.
    Achievements,
}

impl Channel {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Achievements => "achievements",
        }
    }
}

/// Client → server frames.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present a bearer token for verification.
    Authenticate {
        /// Opaque access token; absent or empty tokens fail authentication.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Register interest in achievement changes.
    SubscribeAchievements,
    /// Ask for the current presence snapshot.
    ListTeachers,
    /// Reviewer heartbeat.
    Ping,
}

impl ClientMessage {
    /// Wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::SubscribeAchievements => "subscribe_achievements",
            Self::ListTeachers => "list_teachers",
            Self::Ping => "ping",
        }
    }
}

/// Parse an inbound frame.
///
/// Unparseable JSON and unknown `type` values are both malformed.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, RelayError> {
    serde_json::from_str(text).map_err(|e| RelayError::MalformedMessage(e.to_string()))
}

/// One online reviewer as shown to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceView {
    /// Reviewer user id.
    pub user_id: String,
    /// Display name.
    pub full_name: String,
    /// Department; serialized as `null` when unknown.
    #[serde(default)]
    pub department: Option<String>,
    /// Designation, omitted when unknown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub designation: Option<String>,
    /// Last heartbeat, epoch milliseconds on the wire.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
}

/// Server → client frames.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Socket accepted.
    Connected {
        /// Greeting text.
        message: String,
    },
    /// Authentication succeeded.
    Authenticated {
        /// Verified user id.
        #[serde(rename = "userId")]
        user_id: String,
        /// Verified role.
        role: Role,
    },
    /// Authentication failed; the connection stays open.
    AuthError {
        /// Reason.
        message: String,
    },
    /// Subscription acknowledged.
    Subscribed {
        /// Channel name.
        channel: Channel,
    },
    /// Presence snapshot.
    TeachersOnline {
        /// Online reviewers.
        teachers: Vec<PresenceView>,
    },
    /// A new achievement was submitted.
    NewSubmission {
        /// The inserted row.
        data: Value,
    },
    /// An achievement changed (typically its review status).
    AchievementUpdated {
        /// The updated row.
        data: Value,
    },
    /// Generic failure.
    Error {
        /// Reason.
        message: String,
    },
}

impl ServerMessage {
    /// Greeting sent when a socket is accepted.
    pub fn connected() -> Self {
        Self::Connected {
            message: "WebSocket connected".to_string(),
        }
    }

    /// Build an `error` frame.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Build an `auth_error` frame.
    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::AuthError {
            message: message.into(),
        }
    }

    /// Wire `type` of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Authenticated { .. } => "authenticated",
            Self::AuthError { .. } => "auth_error",
            Self::Subscribed { .. } => "subscribed",
            Self::TeachersOnline { .. } => "teachers_online",
            Self::NewSubmission { .. } => "new_submission",
            Self::AchievementUpdated { .. } => "achievement_updated",
            Self::Error { .. } => "error",
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
