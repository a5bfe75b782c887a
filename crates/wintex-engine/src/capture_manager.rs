//! Capture scheduling: priority queue, coalescing and the worker pool.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::registry::WindowRegistry;
use crate::texture::TextureSlot;
use wintex_capture::{CaptureError, Desktop};
use wintex_messages::{CaptureMode, CapturePriority, MessageKind, MessageQueue};

/// Identity of a unit of capture work, for coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WorkKey {
    Window(i32),
    Icon(i32),
    Cursor,
}

#[derive(Debug, Clone, Copy)]
enum WorkItem {
    Window { id: i32, priority: CapturePriority },
    Icon { id: i32 },
    Cursor,
}

impl WorkItem {
    fn key(&self) -> WorkKey {
        match *self {
            WorkItem::Window { id, .. } => WorkKey::Window(id),
            WorkItem::Icon { id } => WorkKey::Icon(id),
            WorkItem::Cursor => WorkKey::Cursor,
        }
    }

    /// Icon and cursor jobs ride the high tier; they are always explicit.
    fn priority(&self) -> CapturePriority {
        match *self {
            WorkItem::Window { priority, .. } => priority,
            WorkItem::Icon { .. } | WorkItem::Cursor => CapturePriority::High,
        }
    }
}

struct QueueState {
    high: VecDeque<WorkItem>,
    low: VecDeque<WorkItem>,
    /// Pending work by key, with the tier it currently sits in.
    queued: HashMap<WorkKey, CapturePriority>,
    /// Work currently inside a backend call, with its tier.
    in_flight: HashMap<WorkKey, CapturePriority>,
    stopping: bool,
}

/// Schedules captures onto a small fixed worker pool.
///
/// Two tiers: explicit high-priority requests jump ahead of the
/// low-priority sweep. Requests coalesce per window — queued or in-flight
/// work at the same or higher tier absorbs a new request, and a high
/// request for low-queued work promotes it to the back of the high queue.
pub struct CaptureManager {
    state: Mutex<QueueState>,
    available: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sweep_cursor: AtomicUsize,
    sweep_batch: usize,
    desktop: Arc<dyn Desktop>,
    registry: Arc<WindowRegistry>,
    messages: Arc<MessageQueue>,
    cursor_slot: Arc<TextureSlot>,
}

impl CaptureManager {
    /// Create the manager and spawn its workers.
    pub fn start(
        config: &EngineConfig,
        desktop: Arc<dyn Desktop>,
        registry: Arc<WindowRegistry>,
        messages: Arc<MessageQueue>,
        cursor_slot: Arc<TextureSlot>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            state: Mutex::new(QueueState {
                high: VecDeque::new(),
                low: VecDeque::new(),
                queued: HashMap::new(),
                in_flight: HashMap::new(),
                stopping: false,
            }),
            available: Condvar::new(),
            workers: Mutex::new(Vec::new()),
            sweep_cursor: AtomicUsize::new(0),
            sweep_batch: config.sweep_batch.max(1),
            desktop,
            registry,
            messages,
            cursor_slot,
        });

        let count = config.effective_workers();
        debug!(workers = count, "starting capture workers");
        let mut workers = manager.workers.lock();
        for n in 0..count {
            let worker = Arc::clone(&manager);
            let handle = thread::Builder::new()
                .name(format!("wintex-capture-{n}"))
                .spawn(move || worker.worker_loop())
                .expect("failed to spawn capture worker");
            workers.push(handle);
        }
        drop(workers);

        manager
    }

    /// Queue a window capture.
    pub fn request_capture(&self, id: i32, priority: CapturePriority) {
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        if !entry.content().mark_requested() {
            return;
        }
        self.enqueue(WorkItem::Window { id, priority });
    }

    /// Queue a one-shot icon capture.
    pub fn request_capture_icon(&self, id: i32) {
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        if !entry.icon().mark_requested() {
            return;
        }
        self.enqueue(WorkItem::Icon { id });
    }

    /// Queue a cursor capture.
    pub fn request_capture_cursor(&self) {
        if !self.cursor_slot.mark_requested() {
            return;
        }
        self.enqueue(WorkItem::Cursor);
    }

    /// Advance the low-priority round-robin over visible windows.
    ///
    /// Each call enqueues up to the configured batch, so every visible
    /// window is revisited within a bounded number of ticks no matter how
    /// much high-priority traffic arrives.
    pub fn sweep(&self) {
        let ids = self.registry.sweepable_ids();
        if ids.is_empty() {
            return;
        }

        let start = self.sweep_cursor.fetch_add(self.sweep_batch, Ordering::Relaxed);
        for k in 0..self.sweep_batch.min(ids.len()) {
            let id = ids[(start + k) % ids.len()];
            if let Some(entry) = self.registry.get(id) {
                entry.content().settle();
            }
            self.request_capture(id, CapturePriority::Low);
        }
    }

    fn enqueue(&self, item: WorkItem) {
        let key = item.key();
        let priority = item.priority();
        let mut state = self.state.lock();
        if state.stopping {
            return;
        }

        if let Some(&queued_priority) = state.queued.get(&key) {
            if priority > queued_priority {
                // Promote: out of the low queue, onto the back of the high
                // queue — ahead of any high request that arrives later.
                if let Some(pos) = state.low.iter().position(|queued| queued.key() == key) {
                    state.low.remove(pos);
                }
                state.high.push_back(item);
                state.queued.insert(key, priority);
                trace!(?key, "promoted pending capture");
            }
            return;
        }

        if let Some(&inflight_priority) = state.in_flight.get(&key) {
            if priority <= inflight_priority {
                return;
            }
            // A higher-priority request than the running capture queues a
            // fresh pass; the running one may already be stale.
        }

        match priority {
            CapturePriority::High => state.high.push_back(item),
            CapturePriority::Low => state.low.push_back(item),
        }
        state.queued.insert(key, priority);
        drop(state);
        self.available.notify_one();
    }

    /// Stop the workers and join them. Pending work is discarded.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.stopping {
                return;
            }
            state.stopping = true;
            state.high.clear();
            state.low.clear();
            state.queued.clear();
        }
        self.available.notify_all();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.join();
        }
    }

    fn worker_loop(&self) {
        loop {
            let item = {
                let mut state = self.state.lock();
                loop {
                    if state.stopping {
                        return;
                    }
                    if let Some(item) = state
                        .high
                        .pop_front()
                        .or_else(|| state.low.pop_front())
                    {
                        let key = item.key();
                        state.queued.remove(&key);
                        state.in_flight.insert(key, item.priority());
                        break item;
                    }
                    self.available.wait(&mut state);
                }
            };

            self.execute(item);
            self.state.lock().in_flight.remove(&item.key());
        }
    }

    fn execute(&self, item: WorkItem) {
        match item {
            WorkItem::Window { id, .. } => self.capture_window(id),
            WorkItem::Icon { id } => self.capture_icon(id),
            WorkItem::Cursor => self.capture_cursor(),
        }
    }

    fn capture_window(&self, id: i32) {
        let Some(entry) = self.registry.get(id) else {
            return;
        };

        let mut mode = entry.resolved_mode(self.desktop.as_ref());
        if mode == CaptureMode::None {
            entry.content().abort_capture();
            return;
        }
        if !entry.content().begin_capture() {
            return;
        }

        loop {
            let reuse = entry.content().take_recycle();
            let result =
                self.desktop
                    .capture_window(entry.handle(), mode, entry.cursor_draw(), reuse);

            match result {
                Ok(buffer) => {
                    // The request is moot if the window vanished while the
                    // backend ran; nothing may become observable.
                    if !self.registry.exists(id) {
                        trace!(id, "dropping capture result for removed window");
                        return;
                    }
                    if entry.content().publish(buffer).0 {
                        self.messages.push(MessageKind::WindowCaptured, id);
                    }
                }
                Err(CaptureError::WindowGone) => {
                    trace!(id, "window vanished during capture");
                    entry.content().abort_capture();
                }
                Err(CaptureError::FrameNotReady) => {
                    // Asynchronous backend warming up or nothing to show;
                    // the sweep will come back around.
                    entry.content().abort_capture();
                }
                Err(CaptureError::Unsupported(_))
                    if mode == CaptureMode::WindowsGraphicsCapture
                        && entry.capture_mode() == CaptureMode::Auto =>
                {
                    debug!(id, "composition capture unavailable, falling back to BitBlt");
                    mode = CaptureMode::BitBlt;
                    entry.override_resolved_mode(mode);
                    continue;
                }
                Err(CaptureError::Unsupported(_)) => {
                    warn!(id, ?mode, "capture mode unsupported for window");
                    entry.set_capture_mode(CaptureMode::None);
                    entry.content().abort_capture();
                }
                Err(e) => {
                    warn!(id, "capture failed: {e}");
                    entry.content().abort_capture();
                }
            }
            return;
        }
    }

    fn capture_icon(&self, id: i32) {
        let Some(entry) = self.registry.get(id) else {
            return;
        };
        if !entry.icon().begin_capture() {
            return;
        }

        match self.desktop.capture_icon(entry.handle()) {
            Ok(buffer) => {
                if !self.registry.exists(id) {
                    return;
                }
                if entry.icon().publish(buffer).0 {
                    self.messages.push(MessageKind::IconCaptured, id);
                }
            }
            Err(CaptureError::WindowGone) => {
                entry.icon().abort_capture();
            }
            Err(e) => {
                debug!(id, "icon capture failed: {e}");
                entry.icon().abort_capture();
            }
        }
    }

    fn capture_cursor(&self) {
        if !self.cursor_slot.begin_capture() {
            return;
        }
        let reuse = self.cursor_slot.take_recycle();
        match self.desktop.capture_cursor(reuse) {
            Ok(buffer) => {
                if self.cursor_slot.publish(buffer).0 {
                    self.messages.push_cursor(MessageKind::CursorCaptured);
                }
            }
            Err(e) => {
                trace!("cursor capture failed: {e}");
                self.cursor_slot.abort_capture();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_window, wait_until, FakeDesktop};
    use crate::texture::SlotState;

    struct Fixture {
        desktop: Arc<FakeDesktop>,
        registry: Arc<WindowRegistry>,
        messages: Arc<MessageQueue>,
        manager: Arc<CaptureManager>,
    }

    impl Fixture {
        fn new(workers: usize, windows: Vec<wintex_capture::WindowSnapshot>) -> Self {
            let desktop = Arc::new(FakeDesktop::with_windows(windows));
            let messages = Arc::new(MessageQueue::new(64));
            let registry = Arc::new(WindowRegistry::new(Arc::clone(&messages)));
            registry.apply_snapshot(&desktop.snapshot().unwrap());
            messages.drain();

            let config = EngineConfig {
                worker_threads: workers,
                sweep_batch: 1,
                ..Default::default()
            };
            let manager = CaptureManager::start(
                &config,
                Arc::clone(&desktop) as Arc<dyn Desktop>,
                Arc::clone(&registry),
                Arc::clone(&messages),
                Arc::new(TextureSlot::new()),
            );

            Self {
                desktop,
                registry,
                messages,
                manager,
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.desktop.release_captures();
            self.manager.shutdown();
        }
    }

    #[test]
    fn test_capture_publishes_buffer_and_message() {
        let fx = Fixture::new(1, vec![test_window(100, 0, 0, 800, 600)]);

        fx.manager.request_capture(1, CapturePriority::High);
        let entry = fx.registry.get(1).unwrap();
        assert!(wait_until(|| entry.content().has_ready()));

        assert_eq!(entry.content().buffer_width(), 800);
        assert_eq!(entry.content().buffer_height(), 600);
        assert!(fx
            .messages
            .drain()
            .iter()
            .any(|m| m.kind == MessageKind::WindowCaptured && m.window_id == 1));
    }

    #[test]
    fn test_same_priority_requests_coalesce() {
        let fx = Fixture::new(1, vec![test_window(100, 0, 0, 800, 600)]);
        fx.desktop.hold_captures();

        fx.manager.request_capture(1, CapturePriority::High);
        fx.manager.request_capture(1, CapturePriority::High);
        fx.manager.request_capture(1, CapturePriority::High);

        fx.desktop.release_captures();
        let entry = fx.registry.get(1).unwrap();
        assert!(wait_until(|| entry.content().has_ready()));
        // Settle: give a hypothetical duplicate time to run.
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert_eq!(fx.desktop.capture_count(100), 1);
    }

    #[test]
    fn test_low_priority_promoted_ahead_of_later_high_requests() {
        let fx = Fixture::new(
            1,
            vec![
                test_window(100, 0, 0, 64, 64),
                test_window(200, 0, 0, 64, 64),
                test_window(300, 0, 0, 64, 64),
            ],
        );
        fx.desktop.hold_captures();

        // Occupy the single worker so ordering is fully deterministic.
        fx.manager.request_capture(1, CapturePriority::High);
        assert!(wait_until(|| fx.desktop.captures_in_progress() == 1));

        fx.manager.request_capture(2, CapturePriority::Low);
        fx.manager.request_capture(2, CapturePriority::High); // promote
        fx.manager.request_capture(3, CapturePriority::High); // queued after

        fx.desktop.release_captures();
        assert!(wait_until(|| fx.desktop.capture_order().len() == 3));

        assert_eq!(fx.desktop.capture_order(), vec![100, 200, 300]);
    }

    #[test]
    fn test_removal_during_capture_drops_result() {
        let fx = Fixture::new(1, vec![test_window(100, 0, 0, 800, 600)]);
        fx.desktop.hold_captures();

        fx.manager.request_capture(1, CapturePriority::High);
        assert!(wait_until(|| fx.desktop.captures_in_progress() == 1));

        // The window disappears while the backend call is still running.
        let entry = fx.registry.get(1).unwrap();
        fx.registry.apply_snapshot(&[]);
        fx.desktop.release_captures();

        assert!(wait_until(|| fx.desktop.capture_count(100) == 1));
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert!(!fx.registry.exists(1));
        assert!(!entry.content().has_ready());
        assert_eq!(entry.content().state(), SlotState::Removed);
        assert!(!fx
            .messages
            .drain()
            .iter()
            .any(|m| m.kind == MessageKind::WindowCaptured));
    }

    #[test]
    fn test_sweep_revisits_every_visible_window() {
        let fx = Fixture::new(
            2,
            vec![
                test_window(100, 0, 0, 64, 64),
                test_window(200, 0, 0, 64, 64),
                test_window(300, 0, 0, 64, 64),
            ],
        );

        // Batch of one per sweep: three sweeps cover all three windows.
        for _ in 0..3 {
            fx.manager.sweep();
        }

        assert!(wait_until(|| {
            fx.desktop.capture_count(100) >= 1
                && fx.desktop.capture_count(200) >= 1
                && fx.desktop.capture_count(300) >= 1
        }));
    }

    #[test]
    fn test_icon_and_cursor_requests() {
        let fx = Fixture::new(1, vec![test_window(100, 0, 0, 64, 64)]);

        fx.manager.request_capture_icon(1);
        let entry = fx.registry.get(1).unwrap();
        assert!(wait_until(|| entry.icon().has_ready()));

        fx.manager.request_capture_cursor();
        assert!(wait_until(|| fx.manager.cursor_slot.has_ready()));

        let kinds: Vec<MessageKind> = fx.messages.drain().iter().map(|m| m.kind).collect();
        assert!(kinds.contains(&MessageKind::IconCaptured));
        assert!(kinds.contains(&MessageKind::CursorCaptured));
        assert_eq!(fx.desktop.icon_capture_count(100), 1);
        assert_eq!(fx.desktop.cursor_capture_count(), 1);
    }

    #[test]
    fn test_mode_none_disables_capture() {
        let fx = Fixture::new(1, vec![test_window(100, 0, 0, 64, 64)]);
        fx.registry
            .get(1)
            .unwrap()
            .set_capture_mode(CaptureMode::None);

        fx.manager.request_capture(1, CapturePriority::High);
        std::thread::sleep(std::time::Duration::from_millis(50));

        assert_eq!(fx.desktop.capture_count(100), 0);
    }
}
