//! The OS desktop boundary consumed by the engine.

use crate::buffer::CaptureBuffer;
use crate::CaptureResult;
use wintex_messages::CaptureMode;

/// Opaque OS window identifier.
///
/// Not owned and not stable across frames; the registry re-validates it on
/// every scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

impl WindowHandle {
    /// The null handle.
    pub fn null() -> Self {
        Self(0)
    }

    /// Whether this is the null handle.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// A point in virtual-screen coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// An axis-aligned rectangle in virtual-screen coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether `point` lies inside the rectangle.
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }

    /// Horizontal center, integer division.
    pub fn center_x(&self) -> i32 {
        self.x + self.width / 2
    }

    /// Vertical center, integer division.
    pub fn center_y(&self) -> i32 {
        self.y + self.height / 2
    }
}

/// Style bits observed for a window during a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStyle {
    pub visible: bool,
    pub enabled: bool,
    pub iconic: bool,
    pub zoomed: bool,
    pub unicode: bool,
    pub hung: bool,
    /// Progman / WorkerW desktop layer window.
    pub desktop: bool,
    /// Eligible for the alt-tab switcher.
    pub alt_tab: bool,
    /// UWP application frame host window.
    pub application_frame: bool,
    /// UWP content (frame host or core window).
    pub uwp: bool,
    /// DWM-cloaked (e.g. suspended store app); enumerable but not on screen.
    pub background: bool,
}

impl WindowStyle {
    const VISIBLE: u32 = 1 << 0;
    const ENABLED: u32 = 1 << 1;
    const ICONIC: u32 = 1 << 2;
    const ZOOMED: u32 = 1 << 3;
    const UNICODE: u32 = 1 << 4;
    const HUNG: u32 = 1 << 5;
    const DESKTOP: u32 = 1 << 6;
    const ALT_TAB: u32 = 1 << 7;
    const APPLICATION_FRAME: u32 = 1 << 8;
    const UWP: u32 = 1 << 9;
    const BACKGROUND: u32 = 1 << 10;

    /// Pack into a bit set for atomic storage.
    pub fn to_bits(self) -> u32 {
        let mut bits = 0;
        let mut set = |flag: bool, bit: u32| {
            if flag {
                bits |= bit;
            }
        };
        set(self.visible, Self::VISIBLE);
        set(self.enabled, Self::ENABLED);
        set(self.iconic, Self::ICONIC);
        set(self.zoomed, Self::ZOOMED);
        set(self.unicode, Self::UNICODE);
        set(self.hung, Self::HUNG);
        set(self.desktop, Self::DESKTOP);
        set(self.alt_tab, Self::ALT_TAB);
        set(self.application_frame, Self::APPLICATION_FRAME);
        set(self.uwp, Self::UWP);
        set(self.background, Self::BACKGROUND);
        bits
    }

    /// Inverse of [`WindowStyle::to_bits`].
    pub fn from_bits(bits: u32) -> Self {
        Self {
            visible: bits & Self::VISIBLE != 0,
            enabled: bits & Self::ENABLED != 0,
            iconic: bits & Self::ICONIC != 0,
            zoomed: bits & Self::ZOOMED != 0,
            unicode: bits & Self::UNICODE != 0,
            hung: bits & Self::HUNG != 0,
            desktop: bits & Self::DESKTOP != 0,
            alt_tab: bits & Self::ALT_TAB != 0,
            application_frame: bits & Self::APPLICATION_FRAME != 0,
            uwp: bits & Self::UWP != 0,
            background: bits & Self::BACKGROUND != 0,
        }
    }
}

/// One window as seen by a single scan pass.
///
/// Snapshots deliberately exclude the title: title queries cross a process
/// boundary and are refreshed lazily through [`Desktop::window_title`].
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub handle: WindowHandle,
    /// Owner window handle, when this is an owned popup.
    pub owner: Option<WindowHandle>,
    pub rect: Rect,
    pub style: WindowStyle,
    pub class_name: String,
    pub process_id: u32,
    pub thread_id: u32,
}

/// The OS surface the engine schedules against.
///
/// `snapshot` runs on the scan thread, the capture calls run on worker
/// threads, and the cheap synchronous queries may run anywhere. No
/// implementation may block the target window's UI thread from a capture
/// call where the OS offers an asynchronous primitive.
pub trait Desktop: Send + Sync {
    /// Walk the window tree, topmost first.
    ///
    /// Transient per-window query failures skip that window; only a failure
    /// of the walk itself is an error.
    fn snapshot(&self) -> CaptureResult<Vec<WindowSnapshot>>;

    /// Query a window's title. `None` when the window is gone.
    fn window_title(&self, handle: WindowHandle) -> Option<String>;

    /// Capture a window's pixels with the given backend.
    ///
    /// `reuse` hands back a previously returned allocation. The resulting
    /// buffer's dimensions win over anything queried earlier; callers must
    /// re-check them.
    fn capture_window(
        &self,
        handle: WindowHandle,
        mode: CaptureMode,
        draw_cursor: bool,
        reuse: Option<CaptureBuffer>,
    ) -> CaptureResult<CaptureBuffer>;

    /// Capture a window's associated icon.
    fn capture_icon(&self, handle: WindowHandle) -> CaptureResult<CaptureBuffer>;

    /// Capture the current mouse cursor image.
    fn capture_cursor(&self, reuse: Option<CaptureBuffer>) -> CaptureResult<CaptureBuffer>;

    /// Current cursor position; cheap synchronous query.
    fn cursor_position(&self) -> Point;

    /// Bounding rectangle of the virtual screen.
    fn virtual_screen(&self) -> Rect;

    /// Whether the compositor-based capture backend is available.
    fn supports_graphics_capture(&self) -> bool;
}
