//! Test doubles: a scriptable desktop and small helpers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use wintex_capture::{
    CaptureBuffer, CaptureError, CaptureResult, Desktop, Point, Rect, WindowHandle,
    WindowSnapshot, WindowStyle,
};
use wintex_messages::CaptureMode;

/// A plain visible window snapshot for tests.
pub fn test_window(handle: isize, x: i32, y: i32, width: i32, height: i32) -> WindowSnapshot {
    WindowSnapshot {
        handle: WindowHandle(handle),
        owner: None,
        rect: Rect::new(x, y, width, height),
        style: WindowStyle {
            visible: true,
            enabled: true,
            ..Default::default()
        },
        class_name: "TestWindow".to_string(),
        process_id: 4242,
        thread_id: 2424,
    }
}

/// Poll `condition` for up to two seconds.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Scriptable [`Desktop`]: a fixed window list, controllable capture
/// blocking, and invocation counters for asserting scheduling behavior.
#[derive(Default)]
pub struct FakeDesktop {
    windows: Mutex<Vec<WindowSnapshot>>,
    titles: Mutex<HashMap<isize, String>>,
    hold: Mutex<bool>,
    hold_cv: Condvar,
    in_progress: AtomicUsize,
    capture_counts: Mutex<HashMap<isize, usize>>,
    capture_order: Mutex<Vec<isize>>,
    icon_counts: Mutex<HashMap<isize, usize>>,
    cursor_captures: AtomicUsize,
    cursor_pos: Mutex<Point>,
    supports_wgc: bool,
}

impl FakeDesktop {
    pub fn with_windows(windows: Vec<WindowSnapshot>) -> Self {
        Self {
            windows: Mutex::new(windows),
            ..Default::default()
        }
    }

    pub fn set_title(&self, handle: isize, title: &str) {
        self.titles.lock().insert(handle, title.to_string());
    }

    pub fn remove_window(&self, handle: isize) {
        self.windows.lock().retain(|w| w.handle.0 != handle);
    }

    pub fn set_cursor_pos(&self, x: i32, y: i32) {
        *self.cursor_pos.lock() = Point { x, y };
    }

    /// Make capture calls block until [`FakeDesktop::release_captures`].
    pub fn hold_captures(&self) {
        *self.hold.lock() = true;
    }

    pub fn release_captures(&self) {
        *self.hold.lock() = false;
        self.hold_cv.notify_all();
    }

    /// Backend invocations for a window so far.
    pub fn capture_count(&self, handle: isize) -> usize {
        self.capture_counts.lock().get(&handle).copied().unwrap_or(0)
    }

    pub fn icon_capture_count(&self, handle: isize) -> usize {
        self.icon_counts.lock().get(&handle).copied().unwrap_or(0)
    }

    pub fn cursor_capture_count(&self) -> usize {
        self.cursor_captures.load(Ordering::SeqCst)
    }

    /// Window handles in backend invocation order.
    pub fn capture_order(&self) -> Vec<isize> {
        self.capture_order.lock().clone()
    }

    /// Captures currently blocked inside the backend.
    pub fn captures_in_progress(&self) -> usize {
        self.in_progress.load(Ordering::SeqCst)
    }

    fn block_while_held(&self) {
        let mut held = self.hold.lock();
        while *held {
            self.hold_cv.wait(&mut held);
        }
    }

    fn fill(handle: isize, rect: Rect, reuse: Option<CaptureBuffer>) -> CaptureBuffer {
        let mut buffer = reuse.unwrap_or_default();
        buffer.reset(rect.width as u32, rect.height as u32);
        buffer.bytes_mut().fill(handle as u8);
        buffer
    }
}

impl Desktop for FakeDesktop {
    fn snapshot(&self) -> CaptureResult<Vec<WindowSnapshot>> {
        Ok(self.windows.lock().clone())
    }

    fn window_title(&self, handle: WindowHandle) -> Option<String> {
        self.titles.lock().get(&handle.0).cloned()
    }

    fn capture_window(
        &self,
        handle: WindowHandle,
        _mode: CaptureMode,
        _draw_cursor: bool,
        reuse: Option<CaptureBuffer>,
    ) -> CaptureResult<CaptureBuffer> {
        self.capture_order.lock().push(handle.0);
        *self.capture_counts.lock().entry(handle.0).or_insert(0) += 1;

        self.in_progress.fetch_add(1, Ordering::SeqCst);
        self.block_while_held();
        self.in_progress.fetch_sub(1, Ordering::SeqCst);

        let rect = self
            .windows
            .lock()
            .iter()
            .find(|w| w.handle == handle)
            .map(|w| w.rect)
            .ok_or(CaptureError::WindowGone)?;

        Ok(Self::fill(handle.0, rect, reuse))
    }

    fn capture_icon(&self, handle: WindowHandle) -> CaptureResult<CaptureBuffer> {
        *self.icon_counts.lock().entry(handle.0).or_insert(0) += 1;

        if !self.windows.lock().iter().any(|w| w.handle == handle) {
            return Err(CaptureError::WindowGone);
        }
        let mut buffer = CaptureBuffer::new();
        buffer.reset(32, 32);
        buffer.bytes_mut().fill(0xAA);
        Ok(buffer)
    }

    fn capture_cursor(&self, reuse: Option<CaptureBuffer>) -> CaptureResult<CaptureBuffer> {
        self.cursor_captures.fetch_add(1, Ordering::SeqCst);
        let mut buffer = reuse.unwrap_or_default();
        buffer.reset(32, 32);
        buffer.bytes_mut().fill(0xCC);
        Ok(buffer)
    }

    fn cursor_position(&self) -> Point {
        *self.cursor_pos.lock()
    }

    fn virtual_screen(&self) -> Rect {
        Rect::new(0, 0, 1920, 1080)
    }

    fn supports_graphics_capture(&self) -> bool {
        self.supports_wgc
    }
}
