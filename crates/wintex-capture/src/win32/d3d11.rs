//! Direct3D 11 device management and texture upload.

use std::ffi::c_void;

use tracing::{debug, instrument};
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D,
    D3D11_BIND_SHADER_RESOURCE, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;

use crate::buffer::CaptureBuffer;
use crate::error::CaptureError;
use crate::gpu::{GpuDevice, GpuTexture};
use crate::CaptureResult;

/// Direct3D 11 device wrapper shared by the capture backends and the
/// texture uploader.
pub struct D3D11Device {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

impl D3D11Device {
    /// Create a new D3D11 device.
    #[instrument(name = "d3d11_create_device")]
    pub fn new() -> CaptureResult<Self> {
        let mut device = None;
        let mut context = None;

        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )?;
        }

        let device = device.ok_or_else(|| CaptureError::api("failed to create D3D11 device"))?;
        let context =
            context.ok_or_else(|| CaptureError::api("failed to get D3D11 device context"))?;

        debug!("created D3D11 device");
        Ok(Self { device, context })
    }

    /// Get the D3D11 device.
    pub fn device(&self) -> &ID3D11Device {
        &self.device
    }

    /// Get the device context.
    pub fn context(&self) -> &ID3D11DeviceContext {
        &self.context
    }

    /// Get the DXGI device interface.
    pub fn dxgi_device(&self) -> CaptureResult<IDXGIDevice> {
        let dxgi: IDXGIDevice = self.device.cast()?;
        Ok(dxgi)
    }
}

impl Clone for D3D11Device {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            context: self.context.clone(),
        }
    }
}

/// [`GpuDevice`] backed by a D3D11 device.
///
/// Textures are default-usage shader resources; the host samples them
/// through the opaque `ID3D11Texture2D` pointer.
pub struct D3d11Gpu {
    d3d: D3D11Device,
}

impl D3d11Gpu {
    pub fn new(d3d: D3D11Device) -> Self {
        Self { d3d }
    }
}

impl GpuDevice for D3d11Gpu {
    fn create_texture(&self, width: u32, height: u32) -> CaptureResult<Box<dyn GpuTexture>> {
        if width == 0 || height == 0 {
            return Err(CaptureError::Gpu(format!(
                "refusing zero-sized texture ({width}x{height})"
            )));
        }

        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: D3D11_BIND_SHADER_RESOURCE.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };

        let mut texture = None;
        unsafe {
            self.d3d
                .device()
                .CreateTexture2D(&desc, None, Some(&mut texture))
                .map_err(|e| CaptureError::Gpu(format!("CreateTexture2D failed: {e}")))?;
        }
        let texture = texture.ok_or_else(|| CaptureError::Gpu("no texture returned".into()))?;

        Ok(Box::new(D3dTexture {
            texture,
            context: self.d3d.context().clone(),
            width,
            height,
        }))
    }
}

struct D3dTexture {
    texture: ID3D11Texture2D,
    context: ID3D11DeviceContext,
    width: u32,
    height: u32,
}

impl GpuTexture for D3dTexture {
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

        unsafe {
            self.context.UpdateSubresource(
                &self.texture,
                0,
                None,
                buffer.bytes().as_ptr() as *const c_void,
                buffer.row_pitch(),
                0,
            );
        }
        Ok(())
    }

    fn native_handle(&self) -> *mut c_void {
        self.texture.as_raw()
    }
}
