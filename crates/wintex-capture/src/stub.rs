//! Non-Windows stub desktop (CI + cross-compilation).

use tracing::info;

use crate::buffer::CaptureBuffer;
use crate::desktop::{Desktop, Point, Rect, WindowHandle, WindowSnapshot};
use crate::error::CaptureError;
use crate::CaptureResult;
use wintex_messages::CaptureMode;

/// Desktop with no windows; every capture reports unsupported.
#[derive(Debug, Default)]
pub struct StubDesktop;

impl StubDesktop {
    pub fn new() -> Self {
        info!("StubDesktop in use (non-Windows build); captures are disabled");
        Self
    }
}

impl Desktop for StubDesktop {
    fn snapshot(&self) -> CaptureResult<Vec<WindowSnapshot>> {
        Ok(Vec::new())
    }

    fn window_title(&self, _handle: WindowHandle) -> Option<String> {
        None
    }

    fn capture_window(
        &self,
        _handle: WindowHandle,
        mode: CaptureMode,
        _draw_cursor: bool,
        _reuse: Option<CaptureBuffer>,
    ) -> CaptureResult<CaptureBuffer> {
        Err(CaptureError::Unsupported(mode))
    }

    fn capture_icon(&self, _handle: WindowHandle) -> CaptureResult<CaptureBuffer> {
        Err(CaptureError::Unsupported(CaptureMode::Auto))
    }

    fn capture_cursor(&self, _reuse: Option<CaptureBuffer>) -> CaptureResult<CaptureBuffer> {
        Err(CaptureError::Unsupported(CaptureMode::Auto))
    }

    fn cursor_position(&self) -> Point {
        Point::default()
    }

    fn virtual_screen(&self) -> Rect {
        Rect::default()
    }

    fn supports_graphics_capture(&self) -> bool {
        false
    }
}
