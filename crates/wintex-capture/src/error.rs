//! Error types for the capture boundary.

use thiserror::Error;

use wintex_messages::CaptureMode;

/// Errors that can occur during capture operations.
///
/// All of these are local and non-fatal: a failed capture drops that one
/// piece of work, never the pipeline.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Windows API error.
    #[error("Windows API error: {message}")]
    WindowsApi {
        message: String,
        #[cfg(windows)]
        #[source]
        source: Option<windows::core::Error>,
    },

    /// The target window disappeared mid-operation.
    #[error("target window is gone")]
    WindowGone,

    /// The requested backend is unavailable for this window or OS.
    #[error("capture mode {0:?} is not supported here")]
    Unsupported(CaptureMode),

    /// Transient failure while walking the window tree; retried next scan.
    #[error("window enumeration failed: {0}")]
    Enumeration(String),

    /// No frame has been produced yet (asynchronous backends warm up).
    #[error("no capture frame ready yet")]
    FrameNotReady,

    /// GPU texture creation or update failed.
    #[error("GPU resource failure: {0}")]
    Gpu(String),
}

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        Self::WindowsApi {
            message: err.message().to_string(),
            source: Some(err),
        }
    }
}

impl CaptureError {
    /// Helper for API failures detected without an HRESULT in hand.
    pub fn api(message: impl Into<String>) -> Self {
        Self::WindowsApi {
            message: message.into(),
            #[cfg(windows)]
            source: None,
        }
    }
}
