//! Window registry: stable ids, lifecycle tracking, hit testing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicIsize, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::texture::TextureSlot;
use wintex_capture::{Desktop, Point, Rect, WindowHandle, WindowSnapshot, WindowStyle};
use wintex_messages::{CaptureMode, MessageKind, MessageQueue};

/// Sentinel id for "no window" / "no parent".
pub const INVALID_ID: i32 = -1;

const MODE_UNRESOLVED: u8 = u8::MAX;

/// One tracked window.
///
/// Scalar attributes are atomics so the scan thread can refresh them while
/// accessors read from the host thread without taking the registry lock
/// for longer than the map lookup.
pub struct WindowEntry {
    id: i32,
    handle: WindowHandle,
    class_name: String,
    parent_id: AtomicI32,
    owner_handle: AtomicIsize,
    x: AtomicI32,
    y: AtomicI32,
    width: AtomicI32,
    height: AtomicI32,
    z_order: AtomicI32,
    style: AtomicU32,
    process_id: AtomicU32,
    thread_id: AtomicU32,
    title: RwLock<String>,
    title_requested: AtomicBool,
    capture_mode: AtomicU8,
    resolved_mode: AtomicU8,
    cursor_draw: AtomicBool,
    content: TextureSlot,
    icon: TextureSlot,
}

impl WindowEntry {
    fn new(id: i32, snapshot: &WindowSnapshot, z_order: i32) -> Self {
        let entry = Self {
            id,
            handle: snapshot.handle,
            class_name: snapshot.class_name.clone(),
            parent_id: AtomicI32::new(INVALID_ID),
            owner_handle: AtomicIsize::new(snapshot.owner.map_or(0, |h| h.0)),
            x: AtomicI32::new(0),
            y: AtomicI32::new(0),
            width: AtomicI32::new(0),
            height: AtomicI32::new(0),
            z_order: AtomicI32::new(0),
            style: AtomicU32::new(0),
            process_id: AtomicU32::new(snapshot.process_id),
            thread_id: AtomicU32::new(snapshot.thread_id),
            title: RwLock::new(String::new()),
            title_requested: AtomicBool::new(false),
            capture_mode: AtomicU8::new(CaptureMode::Auto.to_u8()),
            resolved_mode: AtomicU8::new(MODE_UNRESOLVED),
            cursor_draw: AtomicBool::new(true),
            content: TextureSlot::new(),
            icon: TextureSlot::new(),
        };
        entry.refresh(snapshot, z_order);
        entry
    }

    /// Refresh per-scan attributes. Returns true when the on-screen size
    /// changed. Titles are not touched here; they refresh lazily.
    fn refresh(&self, snapshot: &WindowSnapshot, z_order: i32) -> bool {
        let previous_width = self.width.swap(snapshot.rect.width, Ordering::AcqRel);
        let previous_height = self.height.swap(snapshot.rect.height, Ordering::AcqRel);
        let size_changed =
            previous_width != snapshot.rect.width || previous_height != snapshot.rect.height;

        self.x.store(snapshot.rect.x, Ordering::Release);
        self.y.store(snapshot.rect.y, Ordering::Release);
        self.z_order.store(z_order, Ordering::Release);
        self.style.store(snapshot.style.to_bits(), Ordering::Release);
        self.process_id.store(snapshot.process_id, Ordering::Release);
        self.thread_id.store(snapshot.thread_id, Ordering::Release);
        self.owner_handle
            .store(snapshot.owner.map_or(0, |h| h.0), Ordering::Release);

        size_changed
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn handle(&self) -> WindowHandle {
        self.handle
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Registry id of the owner window, or [`INVALID_ID`].
    pub fn parent_id(&self) -> i32 {
        self.parent_id.load(Ordering::Acquire)
    }

    /// Raw owner window handle, null when unowned.
    pub fn owner_handle(&self) -> WindowHandle {
        WindowHandle(self.owner_handle.load(Ordering::Acquire))
    }

    pub fn rect(&self) -> Rect {
        Rect::new(
            self.x.load(Ordering::Acquire),
            self.y.load(Ordering::Acquire),
            self.width.load(Ordering::Acquire),
            self.height.load(Ordering::Acquire),
        )
    }

    pub fn z_order(&self) -> i32 {
        self.z_order.load(Ordering::Acquire)
    }

    pub fn style(&self) -> WindowStyle {
        WindowStyle::from_bits(self.style.load(Ordering::Acquire))
    }

    pub fn process_id(&self) -> u32 {
        self.process_id.load(Ordering::Acquire)
    }

    pub fn thread_id(&self) -> u32 {
        self.thread_id.load(Ordering::Acquire)
    }

    pub fn title(&self) -> String {
        self.title.read().clone()
    }

    /// Flag the title for refresh on the next scan pass.
    pub fn request_title_update(&self) {
        self.title_requested.store(true, Ordering::Release);
    }

    pub fn capture_mode(&self) -> CaptureMode {
        CaptureMode::from_u8(self.capture_mode.load(Ordering::Acquire))
    }

    /// Change the capture mode; invalidates the cached Auto resolution.
    pub fn set_capture_mode(&self, mode: CaptureMode) {
        self.capture_mode.store(mode.to_u8(), Ordering::Release);
        self.resolved_mode.store(MODE_UNRESOLVED, Ordering::Release);
    }

    /// Backend actually used for this window, resolved once and cached.
    pub fn resolved_mode(&self, desktop: &dyn Desktop) -> CaptureMode {
        let cached = self.resolved_mode.load(Ordering::Acquire);
        if cached != MODE_UNRESOLVED {
            return CaptureMode::from_u8(cached);
        }

        let user = self.capture_mode();
        let resolved = match user {
            CaptureMode::Auto => {
                if desktop.supports_graphics_capture() {
                    CaptureMode::WindowsGraphicsCapture
                } else {
                    CaptureMode::BitBlt
                }
            }
            explicit => explicit,
        };
        self.resolved_mode.store(resolved.to_u8(), Ordering::Release);
        resolved
    }

    /// Force the resolved backend (Auto fallback after a failed capture).
    pub fn override_resolved_mode(&self, mode: CaptureMode) {
        self.resolved_mode.store(mode.to_u8(), Ordering::Release);
    }

    pub fn cursor_draw(&self) -> bool {
        self.cursor_draw.load(Ordering::Acquire)
    }

    pub fn set_cursor_draw(&self, draw: bool) {
        self.cursor_draw.store(draw, Ordering::Release);
    }

    /// Window content capture/upload slot.
    pub fn content(&self) -> &TextureSlot {
        &self.content
    }

    /// Window icon capture/upload slot.
    pub fn icon(&self) -> &TextureSlot {
        &self.icon
    }

    fn mark_removed(&self) {
        self.content.mark_removed();
        self.icon.mark_removed();
    }
}

struct Inner {
    by_id: HashMap<i32, Arc<WindowEntry>>,
    by_handle: HashMap<isize, i32>,
    /// Ids in stacking order, topmost first, from the latest scan.
    z_order: Vec<i32>,
}

/// Tracks every enumerable window with a stable, never-reused id.
pub struct WindowRegistry {
    inner: RwLock<Inner>,
    next_id: AtomicI32,
    messages: Arc<MessageQueue>,
}

impl WindowRegistry {
    pub fn new(messages: Arc<MessageQueue>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                by_handle: HashMap::new(),
                z_order: Vec::new(),
            }),
            next_id: AtomicI32::new(1),
            messages,
        }
    }

    /// Fold one scan pass into the registry, emitting lifecycle events.
    pub fn apply_snapshot(&self, snapshot: &[WindowSnapshot]) {
        let mut events: Vec<(MessageKind, i32)> = Vec::new();

        {
            let mut inner = self.inner.write();
            let mut seen: HashSet<isize> = HashSet::with_capacity(snapshot.len());
            let mut z_order = Vec::with_capacity(snapshot.len());

            for (z, snap) in snapshot.iter().enumerate() {
                seen.insert(snap.handle.0);

                match inner.by_handle.get(&snap.handle.0).copied() {
                    Some(id) => {
                        let entry = &inner.by_id[&id];
                        if entry.refresh(snap, z as i32) {
                            events.push((MessageKind::WindowSizeChanged, id));
                        }
                        z_order.push(id);
                    }
                    None => {
                        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                        let entry = Arc::new(WindowEntry::new(id, snap, z as i32));
                        inner.by_handle.insert(snap.handle.0, id);
                        inner.by_id.insert(id, entry);
                        z_order.push(id);
                        events.push((MessageKind::WindowAdded, id));
                    }
                }
            }

            // Owner handles resolve to parent ids only once every window
            // from this pass has an id.
            for snap in snapshot {
                if let Some(owner) = snap.owner {
                    let parent = inner.by_handle.get(&owner.0).copied().unwrap_or(INVALID_ID);
                    if let Some(id) = inner.by_handle.get(&snap.handle.0) {
                        inner.by_id[id].parent_id.store(parent, Ordering::Release);
                    }
                }
            }

            let gone: Vec<(isize, i32)> = inner
                .by_handle
                .iter()
                .filter(|(handle, _)| !seen.contains(handle))
                .map(|(&handle, &id)| (handle, id))
                .collect();
            for (handle, id) in gone {
                inner.by_handle.remove(&handle);
                if let Some(entry) = inner.by_id.remove(&id) {
                    entry.mark_removed();
                }
                events.push((MessageKind::WindowRemoved, id));
                debug!(id, "window removed");
            }

            inner.z_order = z_order;
        }

        for (kind, id) in events {
            self.messages.push(kind, id);
        }
    }

    /// O(1) liveness check; false for unknown or removed ids.
    pub fn exists(&self, id: i32) -> bool {
        self.inner.read().by_id.contains_key(&id)
    }

    pub fn get(&self, id: i32) -> Option<Arc<WindowEntry>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    /// Number of tracked windows.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }

    /// Topmost window whose rectangle contains `point`, skipping windows
    /// that are invisible, minimized or cloaked.
    pub fn window_at(&self, point: Point) -> Option<i32> {
        let inner = self.inner.read();
        for &id in &inner.z_order {
            let Some(entry) = inner.by_id.get(&id) else {
                continue;
            };
            let style = entry.style();
            if !style.visible || style.iconic || style.background {
                continue;
            }
            if entry.rect().contains(point) {
                return Some(id);
            }
        }
        None
    }

    /// All ids, ascending; a stable order for upload rotation.
    pub fn ids_sorted(&self) -> Vec<i32> {
        let mut ids: Vec<i32> = self.inner.read().by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Visible, non-minimized windows in stacking order, for the sweep.
    pub fn sweepable_ids(&self) -> Vec<i32> {
        let inner = self.inner.read();
        inner
            .z_order
            .iter()
            .copied()
            .filter(|id| {
                inner.by_id.get(id).is_some_and(|entry| {
                    let style = entry.style();
                    style.visible && !style.iconic && !style.background
                })
            })
            .collect()
    }

    /// Serve pending lazy title refreshes; runs on the scan thread.
    pub fn service_title_requests(&self, desktop: &dyn Desktop) {
        let pending: Vec<Arc<WindowEntry>> = {
            let inner = self.inner.read();
            inner
                .by_id
                .values()
                .filter(|entry| entry.title_requested.swap(false, Ordering::AcqRel))
                .cloned()
                .collect()
        };

        for entry in pending {
            if let Some(title) = desktop.window_title(entry.handle()) {
                *entry.title.write() = title;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_window, FakeDesktop};

    fn registry() -> (WindowRegistry, Arc<MessageQueue>) {
        let messages = Arc::new(MessageQueue::new(64));
        (WindowRegistry::new(Arc::clone(&messages)), messages)
    }

    #[test]
    fn test_ids_are_stable_and_never_reused() {
        let (registry, _messages) = registry();

        registry.apply_snapshot(&[test_window(100, 0, 0, 800, 600)]);
        assert_eq!(registry.ids_sorted(), vec![1]);

        // Same handle keeps its id across rescans even when it moves.
        registry.apply_snapshot(&[test_window(100, 50, 50, 640, 480)]);
        assert_eq!(registry.ids_sorted(), vec![1]);

        // Remove it, then a new window (even with the same handle) gets a
        // fresh id.
        registry.apply_snapshot(&[]);
        registry.apply_snapshot(&[test_window(100, 0, 0, 800, 600)]);
        assert_eq!(registry.ids_sorted(), vec![2]);
    }

    #[test]
    fn test_lifecycle_events() {
        let (registry, messages) = registry();

        registry.apply_snapshot(&[test_window(100, 0, 0, 800, 600)]);
        registry.apply_snapshot(&[]);

        let kinds: Vec<MessageKind> = messages.drain().iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![MessageKind::WindowAdded, MessageKind::WindowRemoved]
        );
        assert!(!registry.exists(1));
    }

    #[test]
    fn test_removed_exactly_once() {
        let (registry, messages) = registry();

        registry.apply_snapshot(&[test_window(100, 0, 0, 800, 600)]);
        registry.apply_snapshot(&[]);
        registry.apply_snapshot(&[]);

        let removed = messages
            .drain()
            .iter()
            .filter(|m| m.kind == MessageKind::WindowRemoved)
            .count();
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_size_change_emits_event() {
        let (registry, messages) = registry();

        registry.apply_snapshot(&[test_window(100, 0, 0, 800, 600)]);
        messages.drain();

        // A move is not a size change.
        registry.apply_snapshot(&[test_window(100, 10, 10, 800, 600)]);
        assert!(messages.drain().is_empty());

        registry.apply_snapshot(&[test_window(100, 10, 10, 1024, 768)]);
        let kinds: Vec<MessageKind> = messages.drain().iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MessageKind::WindowSizeChanged]);
    }

    #[test]
    fn test_hit_testing_topmost_first() {
        let (registry, _messages) = registry();

        // Snapshot order is z-order, topmost first; both overlap at (50, 50).
        registry.apply_snapshot(&[
            test_window(100, 0, 0, 100, 100),
            test_window(200, 0, 0, 400, 400),
        ]);

        assert_eq!(registry.window_at(Point { x: 50, y: 50 }), Some(1));
        assert_eq!(registry.window_at(Point { x: 300, y: 300 }), Some(2));
        assert_eq!(registry.window_at(Point { x: 999, y: 999 }), None);
    }

    #[test]
    fn test_hit_testing_skips_minimized() {
        let (registry, _messages) = registry();

        let mut top = test_window(100, 0, 0, 100, 100);
        top.style.iconic = true;
        registry.apply_snapshot(&[top, test_window(200, 0, 0, 400, 400)]);

        assert_eq!(registry.window_at(Point { x: 50, y: 50 }), Some(2));
    }

    #[test]
    fn test_parent_resolution() {
        let (registry, _messages) = registry();

        let mut popup = test_window(300, 10, 10, 50, 50);
        popup.owner = Some(WindowHandle(100));
        registry.apply_snapshot(&[popup, test_window(100, 0, 0, 800, 600)]);

        let popup_entry = registry.get(1).unwrap();
        let owner_entry = registry.get(2).unwrap();
        assert_eq!(popup_entry.parent_id(), owner_entry.id());
        assert_eq!(owner_entry.parent_id(), INVALID_ID);
    }

    #[test]
    fn test_lazy_title_refresh() {
        let (registry, _messages) = registry();
        let desktop = FakeDesktop::with_windows(vec![test_window(100, 0, 0, 800, 600)]);
        desktop.set_title(100, "Editor");

        registry.apply_snapshot(&desktop.snapshot().unwrap());
        let entry = registry.get(1).unwrap();

        // Titles do not arrive with the scan.
        assert_eq!(entry.title(), "");

        registry.service_title_requests(&desktop);
        assert_eq!(entry.title(), "");

        entry.request_title_update();
        registry.service_title_requests(&desktop);
        assert_eq!(entry.title(), "Editor");
    }

    #[test]
    fn test_removal_marks_slots_removed() {
        let (registry, _messages) = registry();
        registry.apply_snapshot(&[test_window(100, 0, 0, 800, 600)]);
        let entry = registry.get(1).unwrap();

        registry.apply_snapshot(&[]);
        assert_eq!(entry.content().state(), crate::texture::SlotState::Removed);
        assert_eq!(entry.icon().state(), crate::texture::SlotState::Removed);
    }
}
