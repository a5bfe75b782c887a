//! Desktop-to-scene coordinate conversion.
//!
//! Maps a window rectangle in desktop pixels to scene coordinates centered
//! on the virtual screen, with the y axis flipped (desktop y grows down,
//! scene y grows up) and `base_pixel` desktop pixels per scene unit.

use wintex_capture::Rect;

/// Scene position of a window's center relative to the screen's center.
///
/// Returns `None` when `base_pixel` is zero, negative or non-finite.
pub fn desktop_to_scene(window: Rect, screen: Rect, base_pixel: f32) -> Option<(f32, f32)> {
    if !base_pixel.is_finite() || base_pixel <= 0.0 {
        return None;
    }

    let x = (window.center_x() - screen.center_x()) as f32 / base_pixel;
    let y = (-window.center_y() + screen.center_y()) as f32 / base_pixel;
    Some((x, y))
}
