//! Window tree enumeration.

use tracing::trace;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, RECT};
use windows::Win32::Graphics::Dwm::{DwmGetWindowAttribute, DWMWA_CLOAKED};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetAncestor, GetClassNameW, GetLastActivePopup, GetWindowLongPtrW,
    GetWindowLongW, GetWindowRect, GetWindowTextLengthW, GetWindowTextW,
    GetWindowThreadProcessId, IsHungAppWindow, IsIconic, IsWindow, IsWindowEnabled,
    IsWindowUnicode, IsWindowVisible, IsZoomed, GA_ROOTOWNER, GWLP_HWNDPARENT, GWL_EXSTYLE,
    WS_EX_TOOLWINDOW,
};

use crate::desktop::{Rect, WindowHandle, WindowSnapshot, WindowStyle};
use crate::error::CaptureError;
use crate::CaptureResult;

/// Walk all top-level windows, topmost first.
///
/// Owned popups arrive through the same walk; the owner handle is recorded
/// so the registry can link them. Titles are deliberately not queried here.
pub fn snapshot_windows() -> CaptureResult<Vec<WindowSnapshot>> {
    let mut windows: Vec<WindowSnapshot> = Vec::new();

    unsafe {
        EnumWindows(
            Some(enum_window_callback),
            LPARAM(&mut windows as *mut Vec<WindowSnapshot> as isize),
        )
        .ok()
        .map_err(|e| CaptureError::Enumeration(format!("EnumWindows failed: {e}")))?;
    }

    trace!(count = windows.len(), "window scan complete");
    Ok(windows)
}

unsafe extern "system" fn enum_window_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = &mut *(lparam.0 as *mut Vec<WindowSnapshot>);

    // Windows hidden from the desktop drop out of the registry entirely;
    // minimized windows stay visible and are kept.
    if !IsWindowVisible(hwnd).as_bool() {
        return BOOL::from(true);
    }

    let mut rect = RECT::default();
    if GetWindowRect(hwnd, &mut rect).is_err() {
        // Handle invalidated mid-scan; skip this window for the pass.
        return BOOL::from(true);
    }

    let width = rect.right - rect.left;
    let height = rect.bottom - rect.top;
    if width <= 0 || height <= 0 {
        return BOOL::from(true);
    }

    let mut process_id: u32 = 0;
    let thread_id = GetWindowThreadProcessId(hwnd, Some(&mut process_id));

    let class_name = query_class_name(hwnd);
    let cloaked = is_cloaked(hwnd);
    let application_frame = class_name == "ApplicationFrameWindow";
    let uwp = application_frame || class_name == "Windows.UI.Core.CoreWindow";
    let desktop = class_name == "Progman" || class_name == "WorkerW";

    let style = WindowStyle {
        visible: true,
        enabled: IsWindowEnabled(hwnd).as_bool(),
        iconic: IsIconic(hwnd).as_bool(),
        zoomed: IsZoomed(hwnd).as_bool(),
        unicode: IsWindowUnicode(hwnd).as_bool(),
        hung: IsHungAppWindow(hwnd).as_bool(),
        desktop,
        alt_tab: is_alt_tab_window(hwnd, cloaked),
        application_frame,
        uwp,
        background: cloaked,
    };

    let owner = GetWindowLongPtrW(hwnd, GWLP_HWNDPARENT);

    windows.push(WindowSnapshot {
        handle: WindowHandle(hwnd.0 as isize),
        owner: (owner != 0).then_some(WindowHandle(owner)),
        rect: Rect::new(rect.left, rect.top, width, height),
        style,
        class_name,
        process_id,
        thread_id,
    });

    BOOL::from(true)
}

fn query_class_name(hwnd: HWND) -> String {
    let mut buffer = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, &mut buffer) };
    if len <= 0 {
        return String::new();
    }
    String::from_utf16_lossy(&buffer[..len as usize])
}

fn is_cloaked(hwnd: HWND) -> bool {
    let mut cloaked: u32 = 0;
    let hr = unsafe {
        DwmGetWindowAttribute(
            hwnd,
            DWMWA_CLOAKED,
            &mut cloaked as *mut u32 as *mut _,
            std::mem::size_of::<u32>() as u32,
        )
    };
    hr.is_ok() && cloaked != 0
}

/// The classic alt-tab eligibility walk: the window must be its own root
/// owner's last active popup, not a tool window, and not cloaked.
fn is_alt_tab_window(hwnd: HWND, cloaked: bool) -> bool {
    if cloaked {
        return false;
    }

    let ex_style = unsafe { GetWindowLongW(hwnd, GWL_EXSTYLE) } as u32;
    if ex_style & WS_EX_TOOLWINDOW.0 != 0 {
        return false;
    }

    unsafe {
        let root_owner = GetAncestor(hwnd, GA_ROOTOWNER);
        GetLastActivePopup(root_owner) == hwnd
    }
}

/// Fetch a window's title on demand.
///
/// This crosses a process boundary, which is why the registry refreshes
/// titles lazily rather than on every scan.
pub fn query_window_title(hwnd: HWND) -> Option<String> {
    unsafe {
        let length = GetWindowTextLengthW(hwnd);
        if length <= 0 {
            // Zero length is both "untitled" and "no such window"; report
            // an empty title only while the window still exists.
            return IsWindow(hwnd).as_bool().then(String::new);
        }

        let mut buffer: Vec<u16> = vec![0; (length + 1) as usize];
        let copied = GetWindowTextW(hwnd, &mut buffer);
        if copied <= 0 {
            return None;
        }
        Some(String::from_utf16_lossy(&buffer[..copied as usize]))
    }
}
