//! The wintex engine: window registry, capture scheduling and GPU upload.
//!
//! The host owns the frame loop and drives the engine through two ticks:
//! [`Engine::on_update_tick`] from its update loop and
//! [`Engine::on_render_tick`] from its render callback (the only place GPU
//! resources are touched). Everything else — the periodic window rescan
//! and the capture workers — runs on threads the engine owns.

mod capture_manager;
mod config;
mod coords;
mod cursor;
mod engine;
mod registry;
mod texture;
mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use config::EngineConfig;
pub use coords::desktop_to_scene;
pub use engine::Engine;
pub use registry::{WindowEntry, WindowRegistry};
pub use texture::{SlotState, TextureSlot};

pub use wintex_capture::{
    CaptureBuffer, CaptureError, Desktop, GpuDevice, GpuTexture, Point, Rect, SoftwareGpu,
    WindowHandle,
};
#[cfg(windows)]
pub use wintex_capture::{D3D11Device, D3d11Gpu, Win32Desktop};
#[cfg(not(windows))]
pub use wintex_capture::StubDesktop;
pub use wintex_messages::{
    CaptureMode, CapturePriority, Message, MessageKind, MessageQueue, NO_WINDOW_ID,
};
