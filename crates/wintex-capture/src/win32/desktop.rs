//! `Desktop` implementation on Win32 + WinRT.

use std::collections::HashSet;

use tracing::{info, warn};
use windows::Win32::Foundation::HWND;
use windows::Win32::UI::WindowsAndMessaging::{
    GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
    SM_YVIRTUALSCREEN,
};

use super::cursor;
use super::d3d11::D3D11Device;
use super::enumerate;
use super::gdi;
use super::wgc::WgcBackend;
use crate::buffer::CaptureBuffer;
use crate::desktop::{Desktop, Point, Rect, WindowHandle, WindowSnapshot};
use crate::error::CaptureError;
use crate::CaptureResult;
use wintex_messages::CaptureMode;

/// The live Windows desktop.
pub struct Win32Desktop {
    wgc: Option<WgcBackend>,
}

impl Win32Desktop {
    /// Wire up the capture backends on a shared D3D11 device.
    ///
    /// Degrades gracefully: when Windows.Graphics.Capture is unavailable
    /// (pre-1903), only the GDI backends are offered.
    pub fn new(d3d: D3D11Device) -> CaptureResult<Self> {
        let wgc = if WgcBackend::is_supported() {
            match WgcBackend::new(d3d) {
                Ok(backend) => Some(backend),
                Err(e) => {
                    warn!("Windows.Graphics.Capture init failed, GDI only: {e}");
                    None
                }
            }
        } else {
            info!("Windows.Graphics.Capture not supported on this OS, GDI only");
            None
        };

        Ok(Self { wgc })
    }
}

impl Desktop for Win32Desktop {
    fn snapshot(&self) -> CaptureResult<Vec<WindowSnapshot>> {
        let windows = enumerate::snapshot_windows()?;

        if let Some(ref wgc) = self.wgc {
            let live: HashSet<isize> = windows.iter().map(|w| w.handle.0).collect();
            wgc.prune(|handle| live.contains(&handle));
        }

        Ok(windows)
    }

    fn window_title(&self, handle: WindowHandle) -> Option<String> {
        enumerate::query_window_title(HWND(handle.0 as *mut _))
    }

    fn capture_window(
        &self,
        handle: WindowHandle,
        mode: CaptureMode,
        draw_cursor: bool,
        reuse: Option<CaptureBuffer>,
    ) -> CaptureResult<CaptureBuffer> {
        let hwnd = HWND(handle.0 as *mut _);
        match mode {
            // The engine resolves Auto before scheduling; resolve again
            // here so the backend choice stays in one place for direct
            // callers too.
            CaptureMode::Auto => {
                if let Some(ref wgc) = self.wgc {
                    wgc.capture(handle, draw_cursor, reuse)
                } else {
                    gdi::capture_bitblt(hwnd, draw_cursor, reuse)
                }
            }
            CaptureMode::BitBlt => gdi::capture_bitblt(hwnd, draw_cursor, reuse),
            CaptureMode::PrintWindow => gdi::capture_print_window(hwnd, draw_cursor, reuse),
            CaptureMode::WindowsGraphicsCapture => self
                .wgc
                .as_ref()
                .ok_or(CaptureError::Unsupported(mode))?
                .capture(handle, draw_cursor, reuse),
            CaptureMode::None => Err(CaptureError::Unsupported(mode)),
        }
    }

    fn capture_icon(&self, handle: WindowHandle) -> CaptureResult<CaptureBuffer> {
        gdi::capture_icon(HWND(handle.0 as *mut _))
    }

    fn capture_cursor(&self, reuse: Option<CaptureBuffer>) -> CaptureResult<CaptureBuffer> {
        cursor::capture_cursor(reuse)
    }

    fn cursor_position(&self) -> Point {
        cursor::cursor_position()
    }

    fn virtual_screen(&self) -> Rect {
        unsafe {
            Rect::new(
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
                GetSystemMetrics(SM_CXVIRTUALSCREEN),
                GetSystemMetrics(SM_CYVIRTUALSCREEN),
            )
        }
    }

    fn supports_graphics_capture(&self) -> bool {
        self.wgc.is_some()
    }
}
