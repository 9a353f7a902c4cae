//! Token verification against the hosted auth backend.
//!
//! [`SupabaseVerifier`] resolves a bearer token to a user id, then reads the
//! user's profile row for role and display metadata. [`TimeoutVerifier`]
//! bounds the whole exchange so a hung backend cannot leave a session
//! waiting forever.

use std::sync::Arc;
use std::time::{Duration, Instant};

use accolade_core::{Identity, RelayError, Role};
use accolade_settings::IdentitySettings;
use async_trait::async_trait;
use metrics::histogram;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::metrics::AUTH_VERIFY_DURATION_SECONDS;

/// Errors from the identity backend.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend refused the token.
    #[error("token rejected ({status})")]
    Rejected {
        /// HTTP status code returned by the backend.
        status: u16,
    },

    /// No backend URL or key configured.
    #[error("identity backend not configured")]
    NotConfigured,

    /// Verification did not finish in time.
    #[error("verification timed out after {0:?}")]
    Timeout(Duration),

    /// Backend answered with an unexpected body.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<IdentityError> for RelayError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Rejected { status } => {
                RelayError::Authentication(format!("backend returned {status}"))
            }
            IdentityError::Timeout(d) => {
                RelayError::Timeout(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            }
            other => RelayError::UpstreamUnavailable(other.to_string()),
        }
    }
}

/// Resolves an opaque bearer token to an [`Identity`].
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `token`.
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError>;
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    department: Option<String>,
    #[serde(default)]
    teachers: Option<Value>,
}

impl ProfileRow {
    /// `teachers(designation)` embeds either a list or a single object.
    fn designation(&self) -> Option<String> {
        let rel = self.teachers.as_ref()?;
        let obj = match rel {
            Value::Array(items) => items.first()?,
            other => other,
        };
        obj.get("designation")?.as_str().map(str::to_string)
    }

    fn into_identity(self, user_id: String) -> Identity {
        let role = Role::from_profile(self.role.as_deref());
        let designation = self.designation();
        Identity::new(user_id, role, self.full_name)
            .with_department(self.department)
            .with_designation(designation)
    }
}

/// Verifies tokens against a Supabase project.
#[derive(Debug)]
pub struct SupabaseVerifier {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    service_key: Option<String>,
}

impl SupabaseVerifier {
    /// Create a verifier. A trailing slash on `base_url` is ignored.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        service_key: Option<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            service_key,
        }
    }

    /// Build from settings; fails when the URL or both keys are missing.
    pub fn from_settings(settings: &IdentitySettings) -> Result<Self, IdentityError> {
        let url = settings
            .supabase_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(IdentityError::NotConfigured)?;
        if settings.api_key.is_none() && settings.service_key.is_none() {
            return Err(IdentityError::NotConfigured);
        }
        Ok(Self::new(
            url,
            settings.api_key.clone(),
            settings.service_key.clone(),
        ))
    }

    async fn fetch_user(&self, token: &str) -> Result<AuthUser, IdentityError> {
        let apikey = self
            .api_key
            .as_deref()
            .or(self.service_key.as_deref())
            .ok_or(IdentityError::NotConfigured)?;
        let resp = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .bearer_auth(token)
            .header("apikey", apikey)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(IdentityError::Rejected { status });
        }
        resp.json::<AuthUser>()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRow>, IdentityError> {
        let Some(service_key) = self.service_key.as_deref() else {
            return Ok(None);
        };
        let resp = self
            .client
            .get(format!("{}/rest/v1/profiles", self.base_url))
            .query(&[
                ("user_id", format!("eq.{user_id}")),
                (
                    "select",
                    "role,full_name,department,teachers(designation)".to_string(),
                ),
            ])
            .bearer_auth(service_key)
            .header("apikey", service_key)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            return Err(IdentityError::Rejected { status });
        }
        let rows: Vec<ProfileRow> = resp
            .json()
            .await
            .map_err(|e| IdentityError::Decode(e.to_string()))?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl IdentityVerifier for SupabaseVerifier {
    #[instrument(skip_all)]
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
        let user = self.fetch_user(token).await?;
        let profile = match self.fetch_profile(&user.id).await {
            Ok(profile) => profile.unwrap_or_default(),
            Err(e) => {
                warn!(user_id = %user.id, error = %e, "profile lookup failed, treating as student");
                ProfileRow::default()
            }
        };
        let identity = profile.into_identity(user.id);
        debug!(user_id = %identity.user_id, role = %identity.role, "token verified");
        Ok(identity)
    }
}

/// Bounds another verifier's latency.
pub struct TimeoutVerifier {
    inner: Arc<dyn IdentityVerifier>,
    timeout: Duration,
}

impl TimeoutVerifier {
    /// Wrap `inner`; calls longer than `timeout` fail with [`IdentityError::Timeout`].
    pub fn new(inner: Arc<dyn IdentityVerifier>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl IdentityVerifier for TimeoutVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, IdentityError> {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, self.inner.verify(token)).await;
        histogram!(AUTH_VERIFY_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result.unwrap_or(Err(IdentityError::Timeout(self.timeout)))
    }
}

/// Used when no backend is configured: every token is refused.
pub struct DisabledVerifier;

#[async_trait]
impl IdentityVerifier for DisabledVerifier {
    async fn verify(&self, _token: &str) -> Result<Identity, IdentityError> {
        Err(IdentityError::NotConfigured)
    }
}
