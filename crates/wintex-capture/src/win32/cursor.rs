//! Mouse cursor queries and capture.

use tracing::trace;
use windows::Win32::Foundation::POINT;
use windows::Win32::Graphics::Gdi::{DeleteObject, HDC};
use windows::Win32::UI::WindowsAndMessaging::{
    CopyIcon, DestroyIcon, DrawIconEx, GetCursorInfo, GetCursorPos, GetIconInfo,
    GetSystemMetrics, CURSORINFO, CURSOR_SHOWING, DI_NORMAL, HICON, ICONINFO, SM_CXCURSOR,
    SM_CYCURSOR,
};

use super::gdi::ScreenBitmap;
use crate::buffer::CaptureBuffer;
use crate::desktop::Point;
use crate::error::CaptureError;
use crate::CaptureResult;

/// Current cursor position in virtual-screen coordinates.
pub fn cursor_position() -> Point {
    let mut point = POINT::default();
    if unsafe { GetCursorPos(&mut point) }.is_err() {
        return Point::default();
    }
    Point {
        x: point.x,
        y: point.y,
    }
}

struct OwnedIcon(HICON);

impl OwnedIcon {
    fn snapshot_current() -> Option<(Self, i32, i32)> {
        let mut info = CURSORINFO {
            cbSize: std::mem::size_of::<CURSORINFO>() as u32,
            ..Default::default()
        };
        unsafe { GetCursorInfo(&mut info) }.ok()?;
        if info.flags.0 & CURSOR_SHOWING.0 == 0 {
            return None;
        }

        // Copy so the system cursor can change under us while we draw.
        let icon = unsafe { CopyIcon(info.hCursor) }.ok()?;

        let mut icon_info = ICONINFO::default();
        let (hx, hy) = if unsafe { GetIconInfo(icon, &mut icon_info) }.is_ok() {
            unsafe {
                if !icon_info.hbmMask.is_invalid() {
                    let _ = DeleteObject(icon_info.hbmMask.into());
                }
                if !icon_info.hbmColor.is_invalid() {
                    let _ = DeleteObject(icon_info.hbmColor.into());
                }
            }
            (icon_info.xHotspot as i32, icon_info.yHotspot as i32)
        } else {
            (0, 0)
        };

        Some((Self(icon), hx, hy))
    }
}

impl Drop for OwnedIcon {
    fn drop(&mut self) {
        let _ = unsafe { DestroyIcon(self.0) };
    }
}

/// Draw the current cursor into a capture DC whose origin is at
/// `(origin_x, origin_y)` in screen coordinates. Failures are swallowed:
/// a missing cursor overlay never fails the window capture.
pub fn overlay_cursor(dc: HDC, origin_x: i32, origin_y: i32) {
    let Some((icon, hot_x, hot_y)) = OwnedIcon::snapshot_current() else {
        return;
    };
    let position = cursor_position();

    let _ = unsafe {
        DrawIconEx(
            dc,
            position.x - origin_x - hot_x,
            position.y - origin_y - hot_y,
            icon.0,
            0,
            0,
            0,
            None,
            DI_NORMAL,
        )
    };
}

/// Capture the current cursor image into a BGRA buffer.
pub fn capture_cursor(reuse: Option<CaptureBuffer>) -> CaptureResult<CaptureBuffer> {
    let (icon, _, _) =
        OwnedIcon::snapshot_current().ok_or(CaptureError::FrameNotReady)?;

    let width = unsafe { GetSystemMetrics(SM_CXCURSOR) };
    let height = unsafe { GetSystemMetrics(SM_CYCURSOR) };

    let memory = ScreenBitmap::new(width, height)?;
    unsafe {
        DrawIconEx(memory.dc(), 0, 0, icon.0, width, height, 0, None, DI_NORMAL)?;
    }

    let mut buffer = reuse.unwrap_or_default();
    memory.read_into(&mut buffer, width as u32, height as u32)?;
    trace!(width, height, "cursor capture complete");
    Ok(buffer)
}
