//! Registry of reviewers currently online.
//!
//! One entry per reviewer user id. Each entry remembers which connection
//! created it so that a stale socket closing cannot evict the entry a newer
//! connection of the same reviewer wrote.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use accolade_core::{Identity, PresenceView};
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::{PRESENCE_ONLINE, PRESENCE_PRUNED_TOTAL};

/// A reviewer's presence record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Reviewer user id.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
    /// Department, if known.
    pub department: Option<String>,
    /// Designation, if known.
    pub designation: Option<String>,
    /// Last authentication or heartbeat.
    pub last_seen: DateTime<Utc>,
    /// Connection that wrote this entry.
    pub connection_id: String,
}

impl PresenceEntry {
    /// Wire representation.
    pub fn view(&self) -> PresenceView {
        PresenceView {
            user_id: self.user_id.clone(),
            full_name: self.display_name.clone(),
            department: self.department.clone(),
            designation: self.designation.clone(),
            last_seen: self.last_seen,
        }
    }
}

/// Online reviewers keyed by user id.
pub struct PresenceRegistry {
    entries: RwLock<HashMap<String, PresenceEntry>>,
}

impl PresenceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the entry for `identity.user_id`, stamped now.
    ///
    /// Returns the replaced entry, if any.
    pub fn upsert(&self, identity: &Identity, connection_id: &str) -> Option<PresenceEntry> {
        self.upsert_at(identity, connection_id, Utc::now())
    }

    /// [`upsert`](Self::upsert) with an explicit timestamp.
    pub fn upsert_at(
        &self,
        identity: &Identity,
        connection_id: &str,
        now: DateTime<Utc>,
    ) -> Option<PresenceEntry> {
        let entry = PresenceEntry {
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            department: identity.department.clone(),
            designation: identity.designation.clone(),
            last_seen: now,
            connection_id: connection_id.to_string(),
        };
        let mut entries = self.entries.write();
        let previous = entries.insert(identity.user_id.clone(), entry);
        gauge!(PRESENCE_ONLINE).set(entries.len() as f64);
        debug!(user_id = %identity.user_id, connection_id, "presence upserted");
        previous
    }

    /// Refresh `last_seen`. No-op when the user has no entry.
    pub fn touch(&self, user_id: &str) -> bool {
        match self.entries.write().get_mut(user_id) {
            Some(entry) => {
                entry.last_seen = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Remove the entry unconditionally.
    pub fn remove(&self, user_id: &str) -> Option<PresenceEntry> {
        let mut entries = self.entries.write();
        let removed = entries.remove(user_id);
        gauge!(PRESENCE_ONLINE).set(entries.len() as f64);
        removed
    }

    /// Remove the entry only if `connection_id` wrote it.
    pub fn remove_owned(&self, user_id: &str, connection_id: &str) -> bool {
        let mut entries = self.entries.write();
        let owned = entries
            .get(user_id)
            .is_some_and(|e| e.connection_id == connection_id);
        if owned {
            let _ = entries.remove(user_id);
            gauge!(PRESENCE_ONLINE).set(entries.len() as f64);
            debug!(user_id, connection_id, "presence removed");
        }
        owned
    }

    /// Copy of every entry, most recently seen first.
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut list: Vec<PresenceEntry> = self.entries.read().values().cloned().collect();
        list.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        list
    }

    /// Snapshot in wire form.
    pub fn views(&self) -> Vec<PresenceView> {
        self.snapshot().iter().map(PresenceEntry::view).collect()
    }

    /// Drop entries not seen for `max_age`. Returns how many were dropped.
    pub fn prune_stale(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        self.prune_older_than(Utc::now() - max_age)
    }

    /// Drop entries whose `last_seen` is before `cutoff`.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.last_seen >= cutoff);
        let pruned = before - entries.len();
        if pruned > 0 {
            counter!(PRESENCE_PRUNED_TOTAL).increment(pruned as u64);
            gauge!(PRESENCE_ONLINE).set(entries.len() as f64);
        }
        pruned
    }

    /// Whether the user has an entry.
    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.read().contains_key(user_id)
    }

    /// Number of online reviewers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nobody is online.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically drop entries whose heartbeat stopped.
///
/// Runs until `cancel` fires.
pub fn spawn_sweeper(
    registry: Arc<PresenceRegistry>,
    stale_after: Duration,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let pruned = registry.prune_stale(stale_after);
                    if pruned > 0 {
                        info!(pruned, remaining = registry.len(), "pruned stale presence entries");
                    }
                }
            }
        }
        debug!("presence sweeper stopped");
    })
}
