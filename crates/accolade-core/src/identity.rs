//! Verified user identity.

use serde::{Deserialize, Serialize};

/// Capability of an authenticated user.
///
/// Reviewers are serialized as `"teacher"` on the wire, which is what the
/// web client expects; `"reviewer"` is accepted on input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Submits achievements.
    #[serde(rename = "student")]
    Student,
    /// Approves or rejects submissions and appears in presence.
    #[serde(rename = "teacher", alias = "reviewer")]
    Reviewer,
}

impl Role {
    /// Map a profile role column to a capability.
    ///
    /// Anything that is not a teacher is treated as a student.
    pub fn from_profile(role: Option<&str>) -> Self {
        match role.map(str::trim) {
            Some(r) if r.eq_ignore_ascii_case("teacher") || r.eq_ignore_ascii_case("reviewer") => {
                Self::Reviewer
            }
            _ => Self::Student,
        }
    }

    /// Wire spelling of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Reviewer => "teacher",
        }
    }

    /// Whether this role is tracked in presence and receives submissions.
    pub fn is_reviewer(self) -> bool {
        matches!(self, Self::Reviewer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user as returned by the identity verifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user id from the auth backend.
    pub user_id: String,
    /// Capability.
    pub role: Role,
    /// Name shown in presence listings.
    pub display_name: String,
    /// Department, when the profile has one.
    pub department: Option<String>,
    /// Reviewer designation (e.g. "Associate Professor").
    pub designation: Option<String>,
}

impl Identity {
    /// Build an identity, falling back to a role-based display name.
    pub fn new(user_id: impl Into<String>, role: Role, display_name: Option<String>) -> Self {
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| match role {
                Role::Reviewer => "Teacher".to_string(),
                Role::Student => "Student".to_string(),
            });
        Self {
            user_id: user_id.into(),
            role,
            display_name,
            department: None,
            designation: None,
        }
    }

    /// Attach a department.
    #[must_use]
    pub fn with_department(mut self, department: Option<String>) -> Self {
        self.department = department.filter(|d| !d.is_empty());
        self
    }

    /// Attach a designation.
    #[must_use]
    pub fn with_designation(mut self, designation: Option<String>) -> Self {
        self.designation = designation.filter(|d| !d.is_empty());
        self
    }
}
