//! Per-connection session state machine.
//!
//! `Unauthenticated → Authenticated → Subscribed`. Only messages arriving on
//! the owning connection mutate a [`Session`].

use std::collections::HashSet;

use accolade_core::{Channel, Identity, RelayError};

/// Coarse session state, derived from [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No verified identity yet.
    Unauthenticated,
    /// Identity verified, no channel subscriptions.
    Authenticated,
    /// Identity verified and subscribed to at least one channel.
    Subscribed,
}

/// Identity and subscriptions of one connection.
#[derive(Clone, Debug, Default)]
pub struct Session {
    identity: Option<Identity>,
    subscriptions: HashSet<Channel>,
}

impl Session {
    /// Fresh unauthenticated session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        match (&self.identity, self.subscriptions.is_empty()) {
            (None, _) => SessionState::Unauthenticated,
            (Some(_), true) => SessionState::Authenticated,
            (Some(_), false) => SessionState::Subscribed,
        }
    }

    /// Verified identity, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Store a verified identity. Returns the one it replaced.
    ///
    /// Subscriptions survive re-authentication.
    pub fn authenticate(&mut self, identity: Identity) -> Option<Identity> {
        self.identity.replace(identity)
    }

    /// Register interest in `channel`.
    ///
    /// `Ok(true)` when newly added, `Ok(false)` when already subscribed.
    pub fn subscribe(&mut self, channel: Channel) -> Result<bool, RelayError> {
        if self.identity.is_none() {
            return Err(RelayError::NotAuthenticated);
        }
        Ok(self.subscriptions.insert(channel))
    }

    /// Whether `channel` was subscribed.
    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.subscriptions.contains(&channel)
    }

    /// Drop identity and subscriptions, returning the identity.
    pub fn release(&mut self) -> Option<Identity> {
        self.subscriptions.clear();
        self.identity.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accolade_core::Role;
    use assert_matches::assert_matches;

    fn reviewer() -> Identity {
        Identity::new("T1", Role::Reviewer, None)
    }

    #[test]
    fn starts_unauthenticated() {
        let s = Session::new();
        assert_eq!(s.state(), SessionState::Unauthenticated);
        assert!(s.identity().is_none());
    }

    #[test]
    fn subscribe_requires_identity() {
        let mut s = Session::new();
        assert_matches!(
            s.subscribe(Channel::Achievements),
            Err(RelayError::NotAuthenticated)
        );
        assert!(!s.is_subscribed(Channel::Achievements));
    }

    #[test]
    fn transitions() {
        let mut s = Session::new();
        assert!(s.authenticate(reviewer()).is_none());
        assert_eq!(s.state(), SessionState::Authenticated);
        assert!(s.subscribe(Channel::Achievements).unwrap());
        assert_eq!(s.state(), SessionState::Subscribed);
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut s = Session::new();
        let _ = s.authenticate(reviewer());
        assert!(s.subscribe(Channel::Achievements).unwrap());
        assert!(!s.subscribe(Channel::Achievements).unwrap());
        assert!(s.is_subscribed(Channel::Achievements));
    }

    #[test]
    fn reauthenticate_keeps_subscriptions() {
        let mut s = Session::new();
        let _ = s.authenticate(reviewer());
        let _ = s.subscribe(Channel::Achievements);
        let prev = s.authenticate(Identity::new("T2", Role::Reviewer, None));
        assert_eq!(prev.unwrap().user_id, "T1");
        assert_eq!(s.state(), SessionState::Subscribed);
    }

    #[test]
    fn release_clears_everything() {
        let mut s = Session::new();
        let _ = s.authenticate(reviewer());
        let _ = s.subscribe(Channel::Achievements);
        assert_eq!(s.release().unwrap().user_id, "T1");
        assert_eq!(s.state(), SessionState::Unauthenticated);
        assert!(!s.is_subscribed(Channel::Achievements));
    }
}
