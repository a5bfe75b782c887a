//! GDI capture backends: BitBlt, PrintWindow and icon extraction.

use tracing::trace;
use windows::Win32::Foundation::{HWND, LPARAM, POINT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BitBlt, ClientToScreen, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject,
    GetDC, GetDIBits, ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
    DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, SRCCOPY,
};
use windows::Win32::Storage::Xps::{PrintWindow, PRINT_WINDOW_FLAGS};
use windows::Win32::UI::WindowsAndMessaging::{
    DrawIconEx, GetClassLongPtrW, GetClientRect, GetSystemMetrics, GetWindowRect, IsWindow,
    SendMessageTimeoutW, DI_NORMAL, GCLP_HICON, HICON, ICON_BIG, SMTO_ABORTIFHUNG, SMTO_BLOCK,
    SM_CXICON, SM_CYICON, WM_GETICON,
};

use super::cursor::overlay_cursor;
use crate::buffer::CaptureBuffer;
use crate::error::CaptureError;
use crate::CaptureResult;

// In the SDK headers but missing from the generated bindings; renders the
// full window content even where it is occluded or off-screen.
const PW_RENDERFULLCONTENT: PRINT_WINDOW_FLAGS = PRINT_WINDOW_FLAGS(0x0000_0002);

struct WindowDc {
    hwnd: HWND,
    hdc: HDC,
}

impl WindowDc {
    /// DC for a window, or the screen DC when `hwnd` is `None`.
    fn get(hwnd: Option<HWND>) -> CaptureResult<Self> {
        let hwnd = hwnd.unwrap_or_default();
        let hdc = unsafe { GetDC(hwnd) };
        if hdc.is_invalid() {
            return Err(CaptureError::api("GetDC failed"));
        }
        Ok(Self { hwnd, hdc })
    }
}

impl Drop for WindowDc {
    fn drop(&mut self) {
        unsafe {
            ReleaseDC(self.hwnd, self.hdc);
        }
    }
}

struct MemoryBitmap {
    dc: HDC,
    bitmap: HBITMAP,
    previous: HGDIOBJ,
}

impl MemoryBitmap {
    fn compatible_with(source: HDC, width: i32, height: i32) -> CaptureResult<Self> {
        unsafe {
            let dc = CreateCompatibleDC(source);
            if dc.is_invalid() {
                return Err(CaptureError::api("CreateCompatibleDC failed"));
            }
            let bitmap = CreateCompatibleBitmap(source, width, height);
            if bitmap.is_invalid() {
                let _ = DeleteDC(dc);
                return Err(CaptureError::api("CreateCompatibleBitmap failed"));
            }
            let previous = SelectObject(dc, bitmap);
            Ok(Self {
                dc,
                bitmap,
                previous,
            })
        }
    }

    /// Copy the bitmap into `buffer` as tightly packed top-down BGRA.
    fn read_into(&self, buffer: &mut CaptureBuffer, width: u32, height: u32) -> CaptureResult<()> {
        buffer.reset(width, height);

        let mut info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width as i32,
                // Negative height requests a top-down DIB.
                biHeight: -(height as i32),
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let copied = unsafe {
            GetDIBits(
                self.dc,
                self.bitmap,
                0,
                height,
                Some(buffer.bytes_mut().as_mut_ptr() as *mut _),
                &mut info,
                DIB_RGB_COLORS,
            )
        };
        if copied == 0 {
            return Err(CaptureError::api("GetDIBits failed"));
        }
        Ok(())
    }
}

impl Drop for MemoryBitmap {
    fn drop(&mut self) {
        unsafe {
            SelectObject(self.dc, self.previous);
            let _ = DeleteObject(self.bitmap.into());
            let _ = DeleteDC(self.dc);
        }
    }
}

/// A screen-compatible memory bitmap for drawing icons/cursors into.
pub(super) struct ScreenBitmap {
    // Field order matters: the memory DC must go before the screen DC.
    memory: MemoryBitmap,
    _screen: WindowDc,
}

impl ScreenBitmap {
    pub(super) fn new(width: i32, height: i32) -> CaptureResult<Self> {
        let screen = WindowDc::get(None)?;
        let memory = MemoryBitmap::compatible_with(screen.hdc, width, height)?;
        Ok(Self {
            memory,
            _screen: screen,
        })
    }

    pub(super) fn dc(&self) -> HDC {
        self.memory.dc
    }

    pub(super) fn read_into(
        &self,
        buffer: &mut CaptureBuffer,
        width: u32,
        height: u32,
    ) -> CaptureResult<()> {
        self.memory.read_into(buffer, width, height)
    }
}

/// Legacy bitmap copy of the window's client area.
pub fn capture_bitblt(
    hwnd: HWND,
    draw_cursor: bool,
    reuse: Option<CaptureBuffer>,
) -> CaptureResult<CaptureBuffer> {
    if !unsafe { IsWindow(hwnd) }.as_bool() {
        return Err(CaptureError::WindowGone);
    }

    let mut client = RECT::default();
    unsafe { GetClientRect(hwnd, &mut client) }.map_err(|_| CaptureError::WindowGone)?;
    let width = client.right - client.left;
    let height = client.bottom - client.top;
    if width <= 0 || height <= 0 {
        // Minimized or collapsed; nothing to copy right now.
        return Err(CaptureError::FrameNotReady);
    }

    let window_dc = WindowDc::get(Some(hwnd))?;
    let memory = MemoryBitmap::compatible_with(window_dc.hdc, width, height)?;

    unsafe {
        BitBlt(
            memory.dc,
            0,
            0,
            width,
            height,
            window_dc.hdc,
            0,
            0,
            SRCCOPY,
        )?;
    }

    if draw_cursor {
        let mut origin = POINT::default();
        let _ = unsafe { ClientToScreen(hwnd, &mut origin) };
        overlay_cursor(memory.dc, origin.x, origin.y);
    }

    let mut buffer = reuse.unwrap_or_default();
    memory.read_into(&mut buffer, width as u32, height as u32)?;
    trace!(width, height, "bitblt capture complete");
    Ok(buffer)
}

/// Full-content capture of the whole window rectangle via `PrintWindow`.
pub fn capture_print_window(
    hwnd: HWND,
    draw_cursor: bool,
    reuse: Option<CaptureBuffer>,
) -> CaptureResult<CaptureBuffer> {
    if !unsafe { IsWindow(hwnd) }.as_bool() {
        return Err(CaptureError::WindowGone);
    }

    let mut rect = RECT::default();
    unsafe { GetWindowRect(hwnd, &mut rect) }.map_err(|_| CaptureError::WindowGone)?;
    let width = rect.right - rect.left;
    let height = rect.bottom - rect.top;
    if width <= 0 || height <= 0 {
        return Err(CaptureError::FrameNotReady);
    }

    let bitmap = ScreenBitmap::new(width, height)?;

    let ok = unsafe { PrintWindow(hwnd, bitmap.dc(), PW_RENDERFULLCONTENT) };
    if !ok.as_bool() {
        return Err(CaptureError::api("PrintWindow failed"));
    }

    if draw_cursor {
        overlay_cursor(bitmap.dc(), rect.left, rect.top);
    }

    let mut buffer = reuse.unwrap_or_default();
    bitmap.read_into(&mut buffer, width as u32, height as u32)?;
    trace!(width, height, "print-window capture complete");
    Ok(buffer)
}

/// Extract the window's associated icon as a BGRA buffer.
///
/// One-shot path, driven by explicit requests only.
pub fn capture_icon(hwnd: HWND) -> CaptureResult<CaptureBuffer> {
    if !unsafe { IsWindow(hwnd) }.as_bool() {
        return Err(CaptureError::WindowGone);
    }

    let icon = query_window_icon(hwnd).ok_or_else(|| CaptureError::api("window has no icon"))?;

    let width = unsafe { GetSystemMetrics(SM_CXICON) };
    let height = unsafe { GetSystemMetrics(SM_CYICON) };

    let bitmap = ScreenBitmap::new(width, height)?;
    unsafe {
        DrawIconEx(bitmap.dc(), 0, 0, icon, width, height, 0, None, DI_NORMAL)?;
    }

    let mut buffer = CaptureBuffer::new();
    bitmap.read_into(&mut buffer, width as u32, height as u32)?;
    Ok(buffer)
}

fn query_window_icon(hwnd: HWND) -> Option<HICON> {
    // Ask the window first, with a short timeout so a hung target cannot
    // stall the worker; fall back to the class icon.
    let mut result: usize = 0;
    unsafe {
        SendMessageTimeoutW(
            hwnd,
            WM_GETICON,
            WPARAM(ICON_BIG as usize),
            LPARAM(0),
            SMTO_ABORTIFHUNG | SMTO_BLOCK,
            100,
            Some(&mut result),
        );
    }

    if result == 0 {
        result = unsafe { GetClassLongPtrW(hwnd, GCLP_HICON) };
    }

    (result != 0).then(|| HICON(result as *mut _))
}
