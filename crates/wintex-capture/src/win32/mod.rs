//! Win32 / WinRT implementation of the capture boundary.

mod cursor;
mod d3d11;
mod desktop;
mod enumerate;
mod gdi;
mod wgc;

pub use d3d11::{D3D11Device, D3d11Gpu};
pub use desktop::Win32Desktop;
