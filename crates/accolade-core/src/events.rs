//! Row change events from the backing store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Table holding student achievement submissions.
pub const ACHIEVEMENTS_TABLE: &str = "achievements";

/// Column on an achievement row naming the submitting student.
pub const OWNER_COLUMN: &str = "student_id";

/// Kind of row mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// A row was inserted.
    Insert,
    /// A row was updated.
    Update,
}

impl Operation {
    /// Parse the upper-case operation names used by database webhooks.
    ///
    /// Returns `None` for operations the relay does not forward (e.g. `DELETE`).
    pub fn from_webhook(kind: &str) -> Option<Self> {
        match kind.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            _ => None,
        }
    }

    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
        }
    }
}

/// A single row change, consumed once per dispatch pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the row belongs to.
    pub table: String,
    /// Insert or update.
    pub operation: Operation,
    /// Row after the change.
    pub new_row: Value,
    /// Row before the change (updates only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_row: Option<Value>,
}

impl ChangeEvent {
    /// An insert event.
    pub fn insert(table: impl Into<String>, new_row: Value) -> Self {
        Self {
            table: table.into(),
            operation: Operation::Insert,
            new_row,
            previous_row: None,
        }
    }

    /// An update event.
    pub fn update(table: impl Into<String>, new_row: Value, previous_row: Option<Value>) -> Self {
        Self {
            table: table.into(),
            operation: Operation::Update,
            new_row,
            previous_row,
        }
    }

    /// Whether the event concerns the achievements table.
    pub fn is_achievement(&self) -> bool {
        self.table == ACHIEVEMENTS_TABLE
    }

    /// The owning student id of the new row, if present.
    pub fn owner_id(&self) -> Option<&str> {
        self.new_row.get(OWNER_COLUMN).and_then(Value::as_str)
    }
}
