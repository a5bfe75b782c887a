//! Common types shared between the engine and its host.

use serde::{Deserialize, Serialize};

/// How a window's pixels are captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureMode {
    /// Pick the best backend this window and OS version support.
    #[default]
    Auto,

    /// Legacy GDI bitmap copy. Cheap, but occluded regions come out stale.
    BitBlt,

    /// `PrintWindow` with full content rendering; handles occluded and
    /// layered windows at a higher per-call cost.
    PrintWindow,

    /// Per-window compositor capture (Windows 10 1903+).
    WindowsGraphicsCapture,

    /// Capture disabled for this window.
    None,
}

impl CaptureMode {
    /// Lossless round-trip through a byte, for atomic storage.
    pub fn to_u8(self) -> u8 {
        match self {
            CaptureMode::Auto => 0,
            CaptureMode::BitBlt => 1,
            CaptureMode::PrintWindow => 2,
            CaptureMode::WindowsGraphicsCapture => 3,
            CaptureMode::None => 4,
        }
    }

    /// Inverse of [`CaptureMode::to_u8`]; unknown values map to `None`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => CaptureMode::Auto,
            1 => CaptureMode::BitBlt,
            2 => CaptureMode::PrintWindow,
            3 => CaptureMode::WindowsGraphicsCapture,
            _ => CaptureMode::None,
        }
    }
}

/// Scheduling tier for a capture request.
///
/// High-priority requests jump ahead of the background sweep that keeps
/// every visible window fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CapturePriority {
    /// Background refresh; serviced round-robin.
    Low,

    /// Explicit request from active use; serviced first.
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_mode_u8_round_trip() {
        for mode in [
            CaptureMode::Auto,
            CaptureMode::BitBlt,
            CaptureMode::PrintWindow,
            CaptureMode::WindowsGraphicsCapture,
            CaptureMode::None,
        ] {
            assert_eq!(CaptureMode::from_u8(mode.to_u8()), mode);
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(CapturePriority::High > CapturePriority::Low);
    }
}
