//! Relay shutdown: one cancellation token shared by every background task,
//! plus a registry of those tasks so shutdown can wait for them by name.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits when no timeout is given.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of draining tracked tasks.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that exited on their own.
    pub finished: Vec<&'static str>,
    /// Tasks still running at the deadline; these were aborted.
    pub aborted: Vec<&'static str>,
}

/// Owns the relay's cancellation token and its long-running tasks
/// (HTTP listener, change bridge, presence sweeper).
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl ShutdownCoordinator {
    /// Coordinator with no tasks.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Token that fires when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Register a task to be awaited on [`drain`](Self::drain).
    pub fn track(&self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.lock().push((name, handle));
    }

    /// Number of tracked tasks not yet drained.
    pub fn tracked(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Begin shutdown. Idempotent.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("relay shutdown triggered");
        }
        self.token.cancel();
    }

    /// Whether shutdown has begun.
    pub fn is_draining(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown, then wait for tracked tasks until one shared
    /// deadline. Stragglers are aborted.
    pub async fn drain(&self, timeout: Option<Duration>) -> DrainReport {
        self.trigger();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        let deadline = Instant::now() + timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);

        let mut report = DrainReport::default();
        for (name, mut handle) in tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.finished.push(name),
                Ok(Err(e)) => {
                    warn!(task = name, error = %e, "task ended abnormally");
                    report.finished.push(name);
                }
                Err(_) => {
                    handle.abort();
                    report.aborted.push(name);
                }
            }
        }

        if report.aborted.is_empty() {
            info!(tasks = report.finished.len(), "relay tasks drained");
        } else {
            warn!(aborted = ?report.aborted, "drain deadline passed, tasks aborted");
        }
        report
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
