//! In-memory GPU device.
//!
//! Stands in for the D3D11 device in tests and on non-Windows hosts; the
//! "texture" is a plain pixel store, so uploads can be verified byte for
//! byte.

use std::ffi::c_void;

use crate::buffer::{CaptureBuffer, BYTES_PER_PIXEL};
use crate::error::CaptureError;
use crate::gpu::{GpuDevice, GpuTexture};
use crate::CaptureResult;

/// Texture factory backed by plain memory.
#[derive(Debug, Default)]
pub struct SoftwareGpu;

impl SoftwareGpu {
    pub fn new() -> Self {
        Self
    }
}

impl GpuDevice for SoftwareGpu {
    fn create_texture(&self, width: u32, height: u32) -> CaptureResult<Box<dyn GpuTexture>> {
        if width == 0 || height == 0 {
            return Err(CaptureError::Gpu(format!(
                "refusing zero-sized texture ({width}x{height})"
            )));
        }
        Ok(Box::new(SoftwareTexture {
            pixels: vec![0; width as usize * height as usize * BYTES_PER_PIXEL],
            width,
            height,
        }))
    }
}

struct SoftwareTexture {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl GpuTexture for SoftwareTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn upload(&mut self, buffer: &CaptureBuffer) -> CaptureResult<()> {
        if buffer.width() != self.width || buffer.height() != self.height {
            return Err(CaptureError::Gpu(format!(
                "upload size mismatch: buffer {}x{}, texture {}x{}",
                buffer.width(),
                buffer.height(),
                self.width,
                self.height
            )));
        }
        self.pixels.copy_from_slice(buffer.bytes());
        Ok(())
    }

    fn native_handle(&self) -> *mut c_void {
        self.pixels.as_ptr() as *mut c_void
    }

    fn read_back(&self) -> Option<Vec<u8>> {
        Some(self.pixels.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_and_read_back() {
        let gpu = SoftwareGpu::new();
        let mut texture = gpu.create_texture(2, 1).unwrap();

        let buffer = CaptureBuffer::from_bgra(vec![1, 2, 3, 4, 5, 6, 7, 8], 2, 1);
        texture.upload(&buffer).unwrap();

        assert_eq!(texture.read_back().unwrap(), buffer.bytes());
        assert!(!texture.native_handle().is_null());
    }

    #[test]
    fn test_upload_rejects_size_mismatch() {
        let gpu = SoftwareGpu::new();
        let mut texture = gpu.create_texture(2, 2).unwrap();

        let buffer = CaptureBuffer::from_bgra(vec![0; 4], 1, 1);
        assert!(texture.upload(&buffer).is_err());
    }

    #[test]
    fn test_zero_sized_texture_rejected() {
        let gpu = SoftwareGpu::new();
        assert!(gpu.create_texture(0, 4).is_err());
    }
}
