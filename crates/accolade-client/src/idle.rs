//! Reviewer presence beacon with idle auto-disable.
//!
//! While a reviewer is active the beacon sends a `ping` every heartbeat so
//! the relay keeps their presence entry fresh. Once no activity has been
//! recorded for the idle timeout, the beacon closes the client, which takes
//! the reviewer offline.

use std::sync::Arc;
use std::time::Duration;

use accolade_core::ClientMessage;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::reconnector::ClientHandle;

/// Last time the local user did something (pointer, keyboard, focus).
#[derive(Debug)]
pub struct ActivityTracker {
    last: Mutex<Instant>,
}

impl ActivityTracker {
    /// Tracker that counts creation as activity.
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    /// Record activity now.
    pub fn record(&self) {
        *self.last.lock() = Instant::now();
    }

    /// Time since the last recorded activity.
    pub fn idle_for(&self) -> Duration {
        self.last.lock().elapsed()
    }

    /// Whether nothing was recorded for at least `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.idle_for() >= timeout
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a beacon stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeaconExit {
    /// Idle timeout reached; the client was closed.
    Idle,
    /// The client was closed by someone else.
    ClientClosed,
}

/// Periodic heartbeat tied to user activity.
pub struct PresenceBeacon {
    client: ClientHandle,
    tracker: Arc<ActivityTracker>,
    heartbeat: Duration,
    idle_timeout: Duration,
}

impl PresenceBeacon {
    /// Beacon for `client` with the heartbeat and idle timeout from `config`.
    pub fn new(client: ClientHandle, tracker: Arc<ActivityTracker>, config: &ClientConfig) -> Self {
        Self {
            client,
            tracker,
            heartbeat: config.heartbeat_interval.max(Duration::from_millis(1)),
            idle_timeout: config.idle_timeout,
        }
    }

    /// Run on the current runtime.
    pub fn spawn(self) -> JoinHandle<BeaconExit> {
        tokio::spawn(self.run())
    }

    /// Heartbeat until idle or until the client closes.
    pub async fn run(self) -> BeaconExit {
        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            let idle_left = self.idle_timeout.saturating_sub(self.tracker.idle_for());
            tokio::select! {
                _ = ticker.tick() => {}
                () = tokio::time::sleep(idle_left) => {}
            }

            if self.client.is_closed() {
                debug!("client closed, beacon stopping");
                return BeaconExit::ClientClosed;
            }
            if self.tracker.is_idle(self.idle_timeout) {
                info!(idle = ?self.tracker.idle_for(), "no activity, disabling presence");
                self.client.close();
                return BeaconExit::Idle;
            }
            if self.client.send(&ClientMessage::Ping).is_err() {
                return BeaconExit::ClientClosed;
            }
        }
    }
}
