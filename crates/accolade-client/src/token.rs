//! Access token sources.
//!
//! The reconnector asks its [`TokenSource`] for a token every time a socket
//! opens, so a refreshed session token is picked up on the next reconnect.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Supplies the bearer token sent in `authenticate`.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current token, or `None` to connect without authenticating.
    async fn token(&self) -> Option<String>;
}

/// Fixed token.
#[derive(Clone, Debug, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Always `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    /// Never authenticates.
    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token that can be replaced after the client is spawned (sign-in,
/// refresh, sign-out).
#[derive(Clone, Debug, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    /// Start with `token`.
    pub fn new(token: Option<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(token)),
        }
    }

    /// Replace the token used from the next connection on.
    pub fn set(&self, token: Option<String>) {
        *self.inner.write() = token;
    }
}

#[async_trait]
impl TokenSource for SharedToken {
    async fn token(&self) -> Option<String> {
        self.inner.read().clone()
    }
}
