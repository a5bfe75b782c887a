//! The engine facade owned by the host.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::capture_manager::CaptureManager;
use crate::config::EngineConfig;
use crate::cursor::CursorPipeline;
use crate::registry::{WindowRegistry, INVALID_ID};
use crate::upload::UploadManager;
use wintex_capture::{Desktop, GpuDevice, Point, Rect};
use wintex_messages::{CaptureMode, CapturePriority, Message, MessageQueue};

/// Commands handled by the scan thread between timed rescans.
enum ScanCommand {
    /// Serve pending lazy title refreshes now.
    RefreshTitles,
    /// Run a rescan ahead of the timer.
    Rescan,
    Stop,
}

/// The capture engine.
///
/// Construct one at startup, drive it with the two ticks, and drop it (or
/// call [`Engine::shutdown`]) at teardown. All state lives here — there
/// are no globals.
pub struct Engine {
    desktop: Arc<dyn Desktop>,
    gpu: Arc<dyn GpuDevice>,
    registry: Arc<WindowRegistry>,
    messages: Arc<MessageQueue>,
    capture: Arc<CaptureManager>,
    uploader: Mutex<UploadManager>,
    cursor: CursorPipeline,
    sweep_interval: f32,
    sweep_timer: Mutex<f32>,
    scan_tx: Sender<ScanCommand>,
    scan_thread: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Engine {
    /// Build an engine over the given OS and GPU boundaries.
    #[instrument(name = "engine_new", skip_all)]
    pub fn new(desktop: Arc<dyn Desktop>, gpu: Arc<dyn GpuDevice>, config: EngineConfig) -> Self {
        let messages = Arc::new(MessageQueue::new(config.message_capacity));
        let registry = Arc::new(WindowRegistry::new(Arc::clone(&messages)));
        let cursor = CursorPipeline::new();

        let capture = CaptureManager::start(
            &config,
            Arc::clone(&desktop),
            Arc::clone(&registry),
            Arc::clone(&messages),
            Arc::clone(cursor.slot()),
        );

        let (scan_tx, scan_rx) = crossbeam_channel::unbounded();
        let scan_thread = spawn_scan_thread(
            scan_rx,
            Arc::clone(&desktop),
            Arc::clone(&registry),
            Duration::from_millis(config.rescan_interval_ms),
        );

        info!(
            workers = config.effective_workers(),
            rescan_ms = config.rescan_interval_ms,
            "engine started"
        );

        Self {
            desktop,
            gpu,
            registry,
            messages,
            capture,
            uploader: Mutex::new(UploadManager::new(config.upload_budget)),
            cursor,
            sweep_interval: config.sweep_interval.max(0.0),
            sweep_timer: Mutex::new(0.0),
            scan_tx,
            scan_thread: Mutex::new(Some(scan_thread)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Host update tick; paces the low-priority sweep.
    pub fn on_update_tick(&self, dt: f32) {
        if self.sweep_interval <= 0.0 {
            self.capture.sweep();
            return;
        }

        let mut timer = self.sweep_timer.lock();
        *timer += dt.max(0.0);
        while *timer >= self.sweep_interval {
            *timer -= self.sweep_interval;
            self.capture.sweep();
        }
    }

    /// Host render tick; the only place GPU textures are created or
    /// updated.
    pub fn on_render_tick(&self) {
        self.uploader
            .lock()
            .run(&self.registry, self.cursor.slot(), self.gpu.as_ref());
    }

    /// Stop and join all engine threads. Idempotent.
    #[instrument(name = "engine_shutdown", skip_all)]
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.scan_tx.send(ScanCommand::Stop);
        if let Some(handle) = self.scan_thread.lock().take() {
            let _ = handle.join();
        }
        self.capture.shutdown();
        info!("engine stopped");
    }

    /// Run a rescan synchronously on the calling thread.
    pub fn rescan_now(&self) {
        scan_once(self.desktop.as_ref(), &self.registry);
    }

    /// Nudge the scan thread to rescan ahead of its timer.
    pub fn request_rescan(&self) {
        let _ = self.scan_tx.send(ScanCommand::Rescan);
    }

    // ── Messages ──────────────────────────────────────────────────────

    /// Drain the pending lifecycle events; called once per frame.
    pub fn drain_messages(&self) -> Vec<Message> {
        self.messages.drain()
    }

    /// Pending message count.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Discard pending messages without reading them.
    pub fn clear_messages(&self) {
        let _ = self.messages.drain();
    }

    /// Stop reporting window-removed events.
    pub fn exclude_removed_window_events(&self) {
        self.messages.exclude_removed_window_events();
    }

    // ── Capture requests ──────────────────────────────────────────────

    /// Queue a capture of window `id`.
    pub fn request_capture(&self, id: i32, priority: CapturePriority) {
        self.capture.request_capture(id, priority);
    }

    /// Queue a one-shot capture of window `id`'s icon.
    pub fn request_capture_icon(&self, id: i32) {
        self.capture.request_capture_icon(id);
    }

    /// Queue a capture of the cursor image.
    pub fn request_capture_cursor(&self) {
        self.capture.request_capture_cursor();
    }

    /// Ask for window `id`'s title to be refreshed on the scan thread.
    pub fn request_update_title(&self, id: i32) {
        if let Some(entry) = self.registry.get(id) {
            entry.request_title_update();
            let _ = self.scan_tx.send(ScanCommand::RefreshTitles);
        }
    }

    // ── Window queries ────────────────────────────────────────────────
    //
    // Unknown and removed ids answer with sentinels (0 / -1 / false /
    // empty / null), never an error.

    /// Whether `id` refers to a live window.
    pub fn check_existence(&self, id: i32) -> bool {
        self.registry.exists(id)
    }

    /// Number of tracked windows.
    pub fn window_count(&self) -> usize {
        self.registry.len()
    }

    /// Raw OS handle, or 0.
    pub fn window_handle(&self, id: i32) -> isize {
        self.registry.get(id).map_or(0, |w| w.handle().0)
    }

    /// Registry id of the owner window, or -1.
    pub fn window_parent_id(&self, id: i32) -> i32 {
        self.registry.get(id).map_or(INVALID_ID, |w| w.parent_id())
    }

    /// Raw owner handle, or 0.
    pub fn window_owner_handle(&self, id: i32) -> isize {
        self.registry.get(id).map_or(0, |w| w.owner_handle().0)
    }

    pub fn window_x(&self, id: i32) -> i32 {
        self.registry.get(id).map_or(0, |w| w.rect().x)
    }

    pub fn window_y(&self, id: i32) -> i32 {
        self.registry.get(id).map_or(0, |w| w.rect().y)
    }

    pub fn window_width(&self, id: i32) -> i32 {
        self.registry.get(id).map_or(0, |w| w.rect().width)
    }

    pub fn window_height(&self, id: i32) -> i32 {
        self.registry.get(id).map_or(0, |w| w.rect().height)
    }

    /// Stacking position from the latest scan, topmost 0; -1 when unknown.
    pub fn window_z_order(&self, id: i32) -> i32 {
        self.registry.get(id).map_or(INVALID_ID, |w| w.z_order())
    }

    pub fn window_process_id(&self, id: i32) -> u32 {
        self.registry.get(id).map_or(0, |w| w.process_id())
    }

    pub fn window_thread_id(&self, id: i32) -> u32 {
        self.registry.get(id).map_or(0, |w| w.thread_id())
    }

    /// Cached title; empty until a title refresh was requested.
    pub fn window_title(&self, id: i32) -> String {
        self.registry.get(id).map_or_else(String::new, |w| w.title())
    }

    /// OS class name, cached at first sighting.
    pub fn window_class_name(&self, id: i32) -> String {
        self.registry
            .get(id)
            .map_or_else(String::new, |w| w.class_name().to_string())
    }

    /// Width of the latest captured buffer for `id`, or 0.
    pub fn window_texture_width(&self, id: i32) -> u32 {
        self.registry.get(id).map_or(0, |w| w.content().buffer_width())
    }

    /// Height of the latest captured buffer for `id`, or 0.
    pub fn window_texture_height(&self, id: i32) -> u32 {
        self.registry
            .get(id)
            .map_or(0, |w| w.content().buffer_height())
    }

    /// Opaque GPU texture pointer for the host; null until first upload.
    pub fn window_texture_handle(&self, id: i32) -> *mut c_void {
        self.registry
            .get(id)
            .map_or(std::ptr::null_mut(), |w| w.content().native_handle())
    }

    pub fn window_icon_width(&self, id: i32) -> u32 {
        self.registry.get(id).map_or(0, |w| w.icon().buffer_width())
    }

    pub fn window_icon_height(&self, id: i32) -> u32 {
        self.registry.get(id).map_or(0, |w| w.icon().buffer_height())
    }

    pub fn window_icon_handle(&self, id: i32) -> *mut c_void {
        self.registry
            .get(id)
            .map_or(std::ptr::null_mut(), |w| w.icon().native_handle())
    }

    /// Per-window capture mode; `None` for unknown ids.
    pub fn window_capture_mode(&self, id: i32) -> CaptureMode {
        self.registry
            .get(id)
            .map_or(CaptureMode::None, |w| w.capture_mode())
    }

    pub fn set_window_capture_mode(&self, id: i32, mode: CaptureMode) {
        if let Some(entry) = self.registry.get(id) {
            entry.set_capture_mode(mode);
        }
    }

    /// Whether captures of this window draw the cursor into the buffer.
    pub fn window_cursor_draw(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.cursor_draw())
    }

    pub fn set_window_cursor_draw(&self, id: i32, draw: bool) {
        if let Some(entry) = self.registry.get(id) {
            entry.set_cursor_draw(draw);
        }
    }

    /// Packed BGRA pixel of the latest capture, or 0.
    pub fn window_pixel(&self, id: i32, x: u32, y: u32) -> u32 {
        self.registry
            .get(id)
            .and_then(|w| w.content().read_pixel(x, y))
            .unwrap_or(0)
    }

    /// Copy a BGRA region of the latest capture.
    pub fn window_pixels(&self, id: i32, x: u32, y: u32, width: u32, height: u32) -> Option<Vec<u8>> {
        let entry = self.registry.get(id)?;
        let mut out = Vec::new();
        entry
            .content()
            .copy_pixels(&mut out, x, y, width, height)
            .then_some(out)
    }

    pub fn is_window_visible(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().visible)
    }

    pub fn is_window_enabled(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().enabled)
    }

    pub fn is_window_iconic(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().iconic)
    }

    pub fn is_window_zoomed(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().zoomed)
    }

    pub fn is_window_unicode(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().unicode)
    }

    pub fn is_window_hung(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().hung)
    }

    pub fn is_desktop(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().desktop)
    }

    pub fn is_alt_tab_window(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().alt_tab)
    }

    pub fn is_application_frame_window(&self, id: i32) -> bool {
        self.registry
            .get(id)
            .is_some_and(|w| w.style().application_frame)
    }

    pub fn is_uwp_window(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().uwp)
    }

    pub fn is_background_window(&self, id: i32) -> bool {
        self.registry.get(id).is_some_and(|w| w.style().background)
    }

    // ── Hit testing ───────────────────────────────────────────────────

    /// Topmost window at a desktop point, or -1.
    pub fn window_id_from_point(&self, x: i32, y: i32) -> i32 {
        self.registry
            .window_at(Point { x, y })
            .unwrap_or(INVALID_ID)
    }

    /// Topmost window under the cursor, or -1.
    pub fn window_id_under_cursor(&self) -> i32 {
        let position = self.desktop.cursor_position();
        self.registry.window_at(position).unwrap_or(INVALID_ID)
    }

    // ── Cursor ────────────────────────────────────────────────────────

    /// Cursor position, queried synchronously from the OS.
    pub fn cursor_position(&self) -> Point {
        self.desktop.cursor_position()
    }

    pub fn cursor_texture_width(&self) -> u32 {
        self.cursor.texture_width()
    }

    pub fn cursor_texture_height(&self) -> u32 {
        self.cursor.texture_height()
    }

    pub fn cursor_texture_handle(&self) -> *mut c_void {
        self.cursor.texture_handle()
    }

    // ── Screen ────────────────────────────────────────────────────────

    /// Virtual screen bounds.
    pub fn virtual_screen(&self) -> Rect {
        self.desktop.virtual_screen()
    }

    /// Whether the compositor capture backend is available.
    pub fn is_graphics_capture_supported(&self) -> bool {
        self.desktop.supports_graphics_capture()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(windows)]
impl Engine {
    /// Build an engine over the live Windows desktop, sharing one D3D11
    /// device between the capture backends and the texture uploader.
    pub fn native(config: EngineConfig) -> wintex_capture::CaptureResult<Self> {
        let d3d = wintex_capture::D3D11Device::new()?;
        let desktop = Arc::new(wintex_capture::Win32Desktop::new(d3d.clone())?);
        let gpu = Arc::new(wintex_capture::D3d11Gpu::new(d3d));
        Ok(Self::new(desktop, gpu, config))
    }
}

fn spawn_scan_thread(
    rx: Receiver<ScanCommand>,
    desktop: Arc<dyn Desktop>,
    registry: Arc<WindowRegistry>,
    interval: Duration,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("wintex-scan".to_string())
        .spawn(move || {
            debug!("scan thread starting");
            loop {
                match rx.recv_timeout(interval) {
                    Ok(ScanCommand::RefreshTitles) => {
                        registry.service_title_requests(desktop.as_ref());
                    }
                    Ok(ScanCommand::Rescan) | Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                        scan_once(desktop.as_ref(), &registry);
                    }
                    Ok(ScanCommand::Stop)
                    | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("scan thread stopped");
        })
        .expect("failed to spawn scan thread")
}

fn scan_once(desktop: &dyn Desktop, registry: &WindowRegistry) {
    match desktop.snapshot() {
        Ok(snapshot) => {
            registry.apply_snapshot(&snapshot);
            registry.service_title_requests(desktop);
        }
        Err(e) => {
            // Transient; the next pass retries.
            warn!("window enumeration failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_window, wait_until, FakeDesktop};
    use wintex_capture::SoftwareGpu;
    use wintex_messages::MessageKind;

    fn engine_over(desktop: Arc<FakeDesktop>) -> Engine {
        let config = EngineConfig {
            worker_threads: 1,
            // Scans are driven manually via rescan_now for determinism.
            rescan_interval_ms: 3_600_000,
            ..Default::default()
        };
        Engine::new(desktop, Arc::new(SoftwareGpu::new()), config)
    }

    #[test]
    fn test_capture_scenario_end_to_end() {
        let desktop = Arc::new(FakeDesktop::with_windows(vec![test_window(
            100, 0, 0, 800, 600,
        )]));
        let engine = engine_over(Arc::clone(&desktop));

        engine.rescan_now();
        let added = engine.drain_messages();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].kind, MessageKind::WindowAdded);
        let id = added[0].window_id;
        assert!(engine.check_existence(id));
        assert_eq!(engine.window_width(id), 800);

        engine.request_capture(id, CapturePriority::High);
        assert!(wait_until(|| engine.window_texture_width(id) == 800));
        assert_eq!(engine.window_texture_height(id), 600);

        engine.on_render_tick();

        // The GPU texture now holds the captured bytes.
        assert!(!engine.window_texture_handle(id).is_null());
        let pixels = unsafe {
            std::slice::from_raw_parts(engine.window_texture_handle(id) as *const u8, 800 * 600 * 4)
        };
        assert!(pixels.iter().all(|&b| b == 100));

        assert!(engine
            .drain_messages()
            .iter()
            .any(|m| m.kind == MessageKind::WindowCaptured && m.window_id == id));
    }

    #[test]
    fn test_unknown_ids_answer_with_sentinels() {
        let engine = engine_over(Arc::new(FakeDesktop::default()));

        assert!(!engine.check_existence(7));
        assert_eq!(engine.window_handle(7), 0);
        assert_eq!(engine.window_parent_id(7), -1);
        assert_eq!(engine.window_x(7), 0);
        assert_eq!(engine.window_width(7), 0);
        assert_eq!(engine.window_z_order(7), -1);
        assert_eq!(engine.window_process_id(7), 0);
        assert_eq!(engine.window_title(7), "");
        assert_eq!(engine.window_class_name(7), "");
        assert_eq!(engine.window_texture_width(7), 0);
        assert!(engine.window_texture_handle(7).is_null());
        assert_eq!(engine.window_capture_mode(7), CaptureMode::None);
        assert!(!engine.window_cursor_draw(7));
        assert_eq!(engine.window_pixel(7, 0, 0), 0);
        assert!(engine.window_pixels(7, 0, 0, 1, 1).is_none());
        assert!(!engine.is_window_visible(7));
        assert!(!engine.is_alt_tab_window(7));
        assert_eq!(engine.window_id_from_point(10_000, 10_000), -1);
    }

    #[test]
    fn test_removal_before_capture_completion_is_clean() {
        let desktop = Arc::new(FakeDesktop::with_windows(vec![test_window(
            100, 0, 0, 800, 600,
        )]));
        let engine = engine_over(Arc::clone(&desktop));
        engine.rescan_now();
        engine.clear_messages();

        desktop.hold_captures();
        engine.request_capture(1, CapturePriority::High);
        assert!(wait_until(|| desktop.captures_in_progress() == 1));

        // Window vanishes while the backend call is in flight.
        desktop.remove_window(100);
        engine.rescan_now();
        desktop.release_captures();

        assert!(wait_until(|| desktop.captures_in_progress() == 0));
        std::thread::sleep(Duration::from_millis(50));

        assert!(!engine.check_existence(1));
        assert_eq!(engine.window_texture_width(1), 0);
        assert!(engine.window_texture_handle(1).is_null());

        let messages = engine.drain_messages();
        let removed = messages
            .iter()
            .filter(|m| m.kind == MessageKind::WindowRemoved && m.window_id == 1)
            .count();
        assert_eq!(removed, 1);
        assert!(!messages.iter().any(|m| m.kind == MessageKind::WindowCaptured));

        engine.on_render_tick();
        assert!(engine.window_texture_handle(1).is_null());
    }

    #[test]
    fn test_update_tick_sweep_refreshes_visible_windows() {
        let desktop = Arc::new(FakeDesktop::with_windows(vec![
            test_window(100, 0, 0, 64, 64),
            test_window(200, 100, 100, 64, 64),
        ]));
        let engine = engine_over(Arc::clone(&desktop));
        engine.rescan_now();

        for _ in 0..4 {
            engine.on_update_tick(1.0 / 60.0);
        }

        assert!(wait_until(|| {
            desktop.capture_count(100) >= 1 && desktop.capture_count(200) >= 1
        }));
    }

    #[test]
    fn test_cursor_pipeline_and_position() {
        let desktop = Arc::new(FakeDesktop::default());
        desktop.set_cursor_pos(123, 456);
        let engine = engine_over(Arc::clone(&desktop));

        let position = engine.cursor_position();
        assert_eq!((position.x, position.y), (123, 456));
        assert_eq!(engine.cursor_texture_width(), 0);

        engine.request_capture_cursor();
        assert!(wait_until(|| engine.cursor_texture_width() == 32));
        engine.on_render_tick();
        assert!(!engine.cursor_texture_handle().is_null());
        assert!(engine
            .drain_messages()
            .iter()
            .any(|m| m.kind == MessageKind::CursorCaptured));
    }

    #[test]
    fn test_icon_capture() {
        let desktop = Arc::new(FakeDesktop::with_windows(vec![test_window(
            100, 0, 0, 64, 64,
        )]));
        let engine = engine_over(Arc::clone(&desktop));
        engine.rescan_now();

        engine.request_capture_icon(1);
        assert!(wait_until(|| engine.window_icon_width(1) == 32));
        engine.on_render_tick();
        assert!(!engine.window_icon_handle(1).is_null());
    }

    #[test]
    fn test_lazy_title_via_scan_command() {
        let desktop = Arc::new(FakeDesktop::with_windows(vec![test_window(
            100, 0, 0, 64, 64,
        )]));
        desktop.set_title(100, "Terminal");
        let engine = engine_over(Arc::clone(&desktop));
        engine.rescan_now();

        assert_eq!(engine.window_title(1), "");
        engine.request_update_title(1);
        assert!(wait_until(|| engine.window_title(1) == "Terminal"));
    }

    #[test]
    fn test_window_under_cursor() {
        let desktop = Arc::new(FakeDesktop::with_windows(vec![test_window(
            100, 0, 0, 200, 200,
        )]));
        desktop.set_cursor_pos(50, 50);
        let engine = engine_over(Arc::clone(&desktop));
        engine.rescan_now();

        assert_eq!(engine.window_id_under_cursor(), 1);
        desktop.set_cursor_pos(500, 500);
        assert_eq!(engine.window_id_under_cursor(), -1);
    }

    #[test]
    fn test_pixel_queries_after_capture() {
        let desktop = Arc::new(FakeDesktop::with_windows(vec![test_window(
            100, 0, 0, 16, 16,
        )]));
        let engine = engine_over(Arc::clone(&desktop));
        engine.rescan_now();

        engine.request_capture(1, CapturePriority::High);
        assert!(wait_until(|| engine.window_texture_width(1) == 16));

        let pixel = engine.window_pixel(1, 3, 3);
        assert_eq!(pixel, u32::from_le_bytes([100, 100, 100, 100]));
        let region = engine.window_pixels(1, 0, 0, 4, 4).unwrap();
        assert_eq!(region.len(), 4 * 4 * 4);
        assert!(engine.window_pixels(1, 14, 14, 4, 4).is_none());
    }

    #[test]
    fn test_shutdown_is_idempotent_and_joins() {
        let desktop = Arc::new(FakeDesktop::with_windows(vec![test_window(
            100, 0, 0, 64, 64,
        )]));
        let engine = engine_over(desktop);
        engine.rescan_now();
        engine.request_capture(1, CapturePriority::High);

        engine.shutdown();
        engine.shutdown();

        // Requests after shutdown are ignored, not panics.
        engine.request_capture(1, CapturePriority::High);
    }
}
