//! Lifecycle messages and the bounded message ring.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::NO_WINDOW_ID;

/// What happened to a window (or the cursor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// A window was seen for the first time.
    WindowAdded,

    /// A previously tracked window is no longer enumerable.
    WindowRemoved,

    /// A capture finished and a fresh buffer is available.
    WindowCaptured,

    /// The window's on-screen size changed since the last scan.
    WindowSizeChanged,

    /// A window icon capture finished.
    IconCaptured,

    /// A cursor capture finished.
    CursorCaptured,
}

/// A single lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Event kind.
    pub kind: MessageKind,

    /// Target window id, or [`NO_WINDOW_ID`] for cursor events.
    pub window_id: i32,

    /// Milliseconds since the queue was created.
    pub timestamp_ms: u64,
}

struct Inner {
    entries: VecDeque<Message>,
    exclude_removed: bool,
    dropped: u64,
}

/// Bounded ring of lifecycle events.
///
/// Producers append from any thread; the host drains the full batch once
/// per frame. When full, the oldest entry is evicted so producers never
/// block.
pub struct MessageQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    started_at: Instant,
}

impl MessageQueue {
    /// Create a queue holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                exclude_removed: false,
                dropped: 0,
            }),
            capacity,
            started_at: Instant::now(),
        }
    }

    /// Append an event for a window.
    pub fn push(&self, kind: MessageKind, window_id: i32) {
        let timestamp_ms = self.started_at.elapsed().as_millis() as u64;
        let mut inner = self.inner.lock();

        if inner.exclude_removed && kind == MessageKind::WindowRemoved {
            return;
        }

        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
            inner.dropped += 1;
        }
        inner.entries.push_back(Message {
            kind,
            window_id,
            timestamp_ms,
        });
    }

    /// Append a cursor event.
    pub fn push_cursor(&self, kind: MessageKind) {
        self.push(kind, NO_WINDOW_ID);
    }

    /// Take the whole pending batch, clearing the queue.
    pub fn drain(&self) -> Vec<Message> {
        self.inner.lock().entries.drain(..).collect()
    }

    /// Number of pending messages.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Total messages evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Stop reporting `WindowRemoved` events from now on.
    ///
    /// One-way switch; pending entries are left untouched.
    pub fn exclude_removed_window_events(&self) {
        self.inner.lock().exclude_removed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_returns_batch_and_clears() {
        let queue = MessageQueue::new(8);
        queue.push(MessageKind::WindowAdded, 1);
        queue.push(MessageKind::WindowCaptured, 1);

        let batch = queue.drain();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].kind, MessageKind::WindowAdded);
        assert_eq!(batch[1].kind, MessageKind::WindowCaptured);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let queue = MessageQueue::new(3);
        for id in 0..5 {
            queue.push(MessageKind::WindowAdded, id);
        }

        let batch = queue.drain();
        assert_eq!(batch.len(), 3);
        let ids: Vec<i32> = batch.iter().map(|m| m.window_id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert_eq!(queue.dropped(), 2);
    }

    #[test]
    fn test_exclude_removed_suppresses_only_removed() {
        let queue = MessageQueue::new(8);
        queue.exclude_removed_window_events();
        queue.push(MessageKind::WindowRemoved, 1);
        queue.push(MessageKind::WindowAdded, 2);

        let batch = queue.drain();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, MessageKind::WindowAdded);
    }

    #[test]
    fn test_cursor_event_uses_sentinel_id() {
        let queue = MessageQueue::new(8);
        queue.push_cursor(MessageKind::CursorCaptured);

        let batch = queue.drain();
        assert_eq!(batch[0].window_id, NO_WINDOW_ID);
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let queue = MessageQueue::new(8);
        queue.push(MessageKind::WindowAdded, 1);
        queue.push(MessageKind::WindowAdded, 2);

        let batch = queue.drain();
        assert!(batch[0].timestamp_ms <= batch[1].timestamp_ms);
    }
}
