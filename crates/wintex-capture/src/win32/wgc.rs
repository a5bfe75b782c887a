//! Windows.Graphics.Capture backend.
//!
//! One capture session per window, cached across captures. Frames arrive
//! on a free-threaded pool callback, get copied through a staging texture
//! into a CPU buffer, and land in a latest-frame cell that the worker
//! thread drains. The worker never waits on the compositor, and the
//! target window's UI thread is never entered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use windows::core::{IInspectable, Interface};
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{
    Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_CPU_ACCESS_READ, D3D11_MAP_READ,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;
use windows::Win32::UI::WindowsAndMessaging::IsWindow;

use super::d3d11::D3D11Device;
use crate::buffer::{CaptureBuffer, BYTES_PER_PIXEL};
use crate::desktop::WindowHandle;
use crate::error::CaptureError;
use crate::CaptureResult;

/// Number of frames in each capture frame pool.
const POOL_FRAME_COUNT: i32 = 2;

/// Compositor-based capture with per-window session caching.
pub struct WgcBackend {
    d3d: D3D11Device,
    direct3d: IDirect3DDevice,
    sessions: Mutex<HashMap<isize, Arc<WgcSession>>>,
}

impl WgcBackend {
    /// Whether the OS exposes Windows.Graphics.Capture at all.
    pub fn is_supported() -> bool {
        GraphicsCaptureSession::IsSupported().unwrap_or(false)
    }

    pub fn new(d3d: D3D11Device) -> CaptureResult<Self> {
        let dxgi_device = d3d.dxgi_device()?;
        let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi_device)? };
        let direct3d: IDirect3DDevice = inspectable.cast()?;

        Ok(Self {
            d3d,
            direct3d,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Grab the latest compositor frame for a window.
    ///
    /// Returns `FrameNotReady` while a freshly started session warms up;
    /// the next scheduled capture will find a frame waiting.
    pub fn capture(
        &self,
        handle: WindowHandle,
        draw_cursor: bool,
        reuse: Option<CaptureBuffer>,
    ) -> CaptureResult<CaptureBuffer> {
        let session = self.session_for(handle)?;

        if session.shared.closed.load(Ordering::SeqCst) {
            self.sessions.lock().remove(&handle.0);
            return Err(CaptureError::WindowGone);
        }

        session.set_cursor_enabled(draw_cursor);

        if let Some(buffer) = reuse {
            *session.shared.recycle.lock() = Some(buffer);
        }

        session
            .shared
            .latest
            .lock()
            .take()
            .ok_or(CaptureError::FrameNotReady)
    }

    /// Drop sessions whose window no longer exists.
    ///
    /// Called from the scan thread so dead sessions do not linger between
    /// captures.
    pub fn prune(&self, live: impl Fn(isize) -> bool) {
        self.sessions.lock().retain(|&handle, session| {
            let keep = live(handle) && !session.shared.closed.load(Ordering::SeqCst);
            if !keep {
                debug!(handle, "dropping capture session for dead window");
            }
            keep
        });
    }

    fn session_for(&self, handle: WindowHandle) -> CaptureResult<Arc<WgcSession>> {
        if let Some(session) = self.sessions.lock().get(&handle.0) {
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(WgcSession::start(&self.d3d, &self.direct3d, handle)?);
        self.sessions
            .lock()
            .insert(handle.0, Arc::clone(&session));
        Ok(session)
    }
}

struct SessionShared {
    d3d_device: ID3D11Device,
    context: ID3D11DeviceContext,
    direct3d: IDirect3DDevice,
    latest: Mutex<Option<CaptureBuffer>>,
    recycle: Mutex<Option<CaptureBuffer>>,
    staging: Mutex<Option<(ID3D11Texture2D, u32, u32)>>,
    pool_size: Mutex<SizeInt32>,
    closed: AtomicBool,
}

struct WgcSession {
    session: GraphicsCaptureSession,
    frame_pool: Direct3D11CaptureFramePool,
    shared: Arc<SessionShared>,
    cursor_enabled: AtomicBool,
}

impl WgcSession {
    fn start(
        d3d: &D3D11Device,
        direct3d: &IDirect3DDevice,
        handle: WindowHandle,
    ) -> CaptureResult<Self> {
        let hwnd = HWND(handle.0 as *mut _);
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            return Err(CaptureError::WindowGone);
        }

        let interop: IGraphicsCaptureItemInterop =
            windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()?;
        let item: GraphicsCaptureItem = unsafe { interop.CreateForWindow(hwnd)? };

        let size = item.Size()?;
        debug!(handle = handle.0, width = size.Width, height = size.Height, "starting capture session");

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            direct3d,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            POOL_FRAME_COUNT,
            size,
        )?;

        let shared = Arc::new(SessionShared {
            d3d_device: d3d.device().clone(),
            context: d3d.context().clone(),
            direct3d: direct3d.clone(),
            latest: Mutex::new(None),
            recycle: Mutex::new(None),
            staging: Mutex::new(None),
            pool_size: Mutex::new(size),
            closed: AtomicBool::new(false),
        });

        let frame_shared = Arc::clone(&shared);
        frame_pool.FrameArrived(&TypedEventHandler::new(
            move |pool: &Option<Direct3D11CaptureFramePool>, _| {
                if let Some(pool) = pool {
                    if let Err(e) = frame_shared.on_frame_arrived(pool) {
                        warn!("frame processing error: {e}");
                    }
                }
                Ok(())
            },
        ))?;

        let closed_shared = Arc::clone(&shared);
        item.Closed(&TypedEventHandler::new(
            move |_: &Option<GraphicsCaptureItem>, _: &Option<IInspectable>| {
                closed_shared.closed.store(true, Ordering::SeqCst);
                Ok(())
            },
        ))?;

        let session = frame_pool.CreateCaptureSession(&item)?;
        session.StartCapture()?;

        Ok(Self {
            session,
            frame_pool,
            shared,
            cursor_enabled: AtomicBool::new(true),
        })
    }

    /// Toggle cursor inclusion; the setter only exists on newer builds, so
    /// failures are ignored and the compositor default applies.
    fn set_cursor_enabled(&self, enabled: bool) {
        if self.cursor_enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return;
        }
        if let Ok(session2) = self
            .session
            .cast::<windows::Graphics::Capture::IGraphicsCaptureSession2>()
        {
            let _ = session2.SetIsCursorCaptureEnabled(enabled);
        }
    }
}

impl Drop for WgcSession {
    fn drop(&mut self) {
        let _ = self.session.Close();
        let _ = self.frame_pool.Close();
    }
}

impl SessionShared {
    fn on_frame_arrived(&self, pool: &Direct3D11CaptureFramePool) -> CaptureResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let frame = pool.TryGetNextFrame()?;
        let content = frame.ContentSize()?;

        // Window resized: recreate the pool at the new size and wait for
        // the next frame. The stale frame would carry the old dimensions.
        {
            let mut pool_size = self.pool_size.lock();
            if (content.Width != pool_size.Width || content.Height != pool_size.Height)
                && content.Width > 0
                && content.Height > 0
            {
                trace!(
                    width = content.Width,
                    height = content.Height,
                    "recreating frame pool for new content size"
                );
                pool.Recreate(
                    &self.direct3d,
                    DirectXPixelFormat::B8G8R8A8UIntNormalized,
                    POOL_FRAME_COUNT,
                    content,
                )?;
                *pool_size = content;
                return Ok(());
            }
        }

        let width = content.Width as u32;
        let height = content.Height as u32;
        if width == 0 || height == 0 {
            return Ok(());
        }

        let surface = frame.Surface()?;
        let access: IDirect3DDxgiInterfaceAccess = surface.cast()?;
        let texture: ID3D11Texture2D = unsafe { access.GetInterface()? };

        let staging = self.staging_for(width, height)?;
        unsafe {
            self.context.CopyResource(&staging, &texture);
        }

        let mut buffer = self.recycle.lock().take().unwrap_or_default();
        buffer.reset(width, height);

        unsafe {
            let mut mapped = std::mem::zeroed();
            self.context
                .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))?;

            let src = std::slice::from_raw_parts(
                mapped.pData as *const u8,
                mapped.RowPitch as usize * height as usize,
            );
            let tight = width as usize * BYTES_PER_PIXEL;
            let dst = buffer.bytes_mut();
            for row in 0..height as usize {
                let start = row * mapped.RowPitch as usize;
                dst[row * tight..(row + 1) * tight].copy_from_slice(&src[start..start + tight]);
            }

            self.context.Unmap(&staging, 0);
        }

        // Publish as the latest frame; an unconsumed predecessor goes back
        // into the recycle slot rather than queueing up.
        let displaced = self.latest.lock().replace(buffer);
        if let Some(displaced) = displaced {
            let mut recycle = self.recycle.lock();
            if recycle.is_none() {
                *recycle = Some(displaced);
            }
        }

        Ok(())
    }

    fn staging_for(&self, width: u32, height: u32) -> CaptureResult<ID3D11Texture2D> {
        let mut staging = self.staging.lock();
        if let Some((texture, w, h)) = staging.as_ref() {
            if *w == width && *h == height {
                return Ok(texture.clone());
            }
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
            Usage: D3D11_USAGE_STAGING,
            BindFlags: 0,
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: 0,
        };

        let mut texture = None;
        unsafe {
            self.d3d_device
                .CreateTexture2D(&desc, None, Some(&mut texture))?;
        }
        let texture =
            texture.ok_or_else(|| CaptureError::api("failed to create staging texture"))?;

        *staging = Some((texture.clone(), width, height));
        Ok(texture)
    }
}
