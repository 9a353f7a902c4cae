//! Outbound messages held while the socket is down.

use std::collections::VecDeque;

use tracing::warn;

/// FIFO of serialized frames with a hard length limit.
///
/// Pushing onto a full queue evicts the oldest frame.
#[derive(Debug)]
pub struct SendQueue {
    items: VecDeque<String>,
    limit: usize,
    dropped: u64,
}

impl SendQueue {
    /// Queue holding at most `limit` frames (minimum one).
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            items: VecDeque::with_capacity(limit.min(64)),
            limit,
            dropped: 0,
        }
    }

    /// Append a frame. Returns the evicted frame when the queue was full.
    pub fn push(&mut self, frame: String) -> Option<String> {
        let evicted = if self.items.len() >= self.limit {
            self.dropped += 1;
            warn!(limit = self.limit, dropped = self.dropped, "send queue full, dropping oldest");
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(frame);
        evicted
    }

    /// Put back a frame that failed to send so it goes out first next time.
    pub fn requeue(&mut self, frame: String) {
        self.items.push_front(frame);
        if self.items.len() > self.limit {
            self.dropped += 1;
            let _ = self.items.pop_back();
        }
    }

    /// Next frame to send.
    pub fn pop(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    /// Frames waiting.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Nothing waiting.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Frames evicted since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
