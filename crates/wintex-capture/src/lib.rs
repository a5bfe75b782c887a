//! Capture backends for the wintex engine.
//!
//! This crate is the OS boundary: it walks the window tree, extracts
//! window/icon/cursor pixels through the available backends (BitBlt,
//! PrintWindow, Windows.Graphics.Capture) and creates/updates the GPU
//! textures the host composites from. Everything above it (scheduling,
//! registry, state machines) lives in `wintex-engine` and talks to this
//! crate only through the [`Desktop`] and [`GpuDevice`] traits.
//!
//! On non-Windows targets a stub desktop is compiled for CI compatibility.

mod buffer;
mod desktop;
mod error;
mod gpu;
mod software;

pub use buffer::{CaptureBuffer, BYTES_PER_PIXEL};
pub use desktop::{Desktop, Point, Rect, WindowHandle, WindowSnapshot, WindowStyle};
pub use error::CaptureError;
pub use gpu::{GpuDevice, GpuTexture};
pub use software::SoftwareGpu;

#[cfg(windows)]
mod win32;
#[cfg(windows)]
pub use win32::{D3D11Device, D3d11Gpu, Win32Desktop};

#[cfg(not(windows))]
mod stub;
#[cfg(not(windows))]
pub use stub::StubDesktop;

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;
