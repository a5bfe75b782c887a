//! Per-entity capture/upload state machine and buffer handoff.

use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use wintex_capture::{CaptureBuffer, GpuTexture};

/// Capture/upload lifecycle of a window texture (also used for icons and
/// the cursor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing scheduled.
    Idle,
    /// A capture request is queued.
    CaptureRequested,
    /// A worker is inside the backend call.
    Capturing,
    /// A finished buffer awaits upload.
    CaptureReady,
    /// The render thread is copying the buffer to the GPU.
    Uploading,
    /// The GPU texture holds the latest capture.
    Uploaded,
    /// The window is gone. Terminal.
    Removed,
}

impl SlotState {
    fn to_u8(self) -> u8 {
        match self {
            SlotState::Idle => 0,
            SlotState::CaptureRequested => 1,
            SlotState::Capturing => 2,
            SlotState::CaptureReady => 3,
            SlotState::Uploading => 4,
            SlotState::Uploaded => 5,
            SlotState::Removed => 6,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => SlotState::Idle,
            1 => SlotState::CaptureRequested,
            2 => SlotState::Capturing,
            3 => SlotState::CaptureReady,
            4 => SlotState::Uploading,
            5 => SlotState::Uploaded,
            _ => SlotState::Removed,
        }
    }
}

/// Owner of one entity's capture buffers and GPU texture.
///
/// Buffers move between three cells by pointer swap, never by copying
/// pixels: `ready` holds the newest completed capture (at most one),
/// `retained` keeps the last uploaded buffer for pixel queries, and
/// `recycle` hands an allocation back to the next capture. A publish that
/// finds `ready` occupied replaces it and recycles the loser — captures
/// are never queued per window.
pub struct TextureSlot {
    state: AtomicU8,
    ready: Mutex<Option<CaptureBuffer>>,
    retained: Mutex<Option<CaptureBuffer>>,
    recycle: Mutex<Option<CaptureBuffer>>,
    texture: Mutex<Option<Box<dyn GpuTexture>>>,
    has_ready: AtomicBool,
    buffer_width: AtomicU32,
    buffer_height: AtomicU32,
}

impl Default for TextureSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureSlot {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SlotState::Idle.to_u8()),
            ready: Mutex::new(None),
            retained: Mutex::new(None),
            recycle: Mutex::new(None),
            texture: Mutex::new(None),
            has_ready: AtomicBool::new(false),
            buffer_width: AtomicU32::new(0),
            buffer_height: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn store_state(&self, state: SlotState) {
        self.state.store(state.to_u8(), Ordering::Release);
    }

    fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(
                from.to_u8(),
                to.to_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Note a queued capture request. False when the slot is removed.
    ///
    /// A slot in `CaptureReady` keeps that state so the pending buffer
    /// stays visible to the uploader; elsewhere in the pipeline the state
    /// is already ahead of `CaptureRequested`.
    pub fn mark_requested(&self) -> bool {
        self.transition(SlotState::Idle, SlotState::CaptureRequested);
        self.transition(SlotState::Uploaded, SlotState::CaptureRequested);
        self.state() != SlotState::Removed
    }

    /// A worker entered the backend call.
    pub fn begin_capture(&self) -> bool {
        if self.state() == SlotState::Removed {
            return false;
        }
        self.store_state(SlotState::Capturing);
        true
    }

    /// Roll back to idle after a capture produced nothing.
    pub fn abort_capture(&self) {
        let _ = self.transition(SlotState::Capturing, SlotState::Idle);
    }

    /// Hand over a finished capture.
    ///
    /// Returns `(published, size_changed)`; a publish into a removed slot
    /// is dropped.
    pub fn publish(&self, buffer: CaptureBuffer) -> (bool, bool) {
        if self.state() == SlotState::Removed {
            return (false, false);
        }

        let previous_width = self.buffer_width.swap(buffer.width(), Ordering::AcqRel);
        let previous_height = self.buffer_height.swap(buffer.height(), Ordering::AcqRel);
        let size_changed =
            previous_width != buffer.width() || previous_height != buffer.height();

        let displaced = self.ready.lock().replace(buffer);
        if let Some(displaced) = displaced {
            trace!("replacing unconsumed capture buffer");
            self.stash_recycle(displaced);
        }
        self.has_ready.store(true, Ordering::Release);

        if self.state() == SlotState::Removed {
            // Removed raced the swap; drop everything observable.
            self.clear_buffers();
            return (false, false);
        }
        self.store_state(SlotState::CaptureReady);
        (true, size_changed)
    }

    /// Whether a completed capture awaits upload.
    pub fn has_ready(&self) -> bool {
        self.has_ready.load(Ordering::Acquire)
    }

    /// Claim the ready buffer for upload (render thread).
    pub fn take_ready(&self) -> Option<CaptureBuffer> {
        let buffer = self.ready.lock().take()?;
        self.has_ready.store(false, Ordering::Release);
        let _ = self.transition(SlotState::CaptureReady, SlotState::Uploading);
        Some(buffer)
    }

    /// Put a buffer back after a failed upload so the next tick retries.
    pub fn restore_ready(&self, buffer: CaptureBuffer) {
        let mut ready = self.ready.lock();
        if ready.is_none() {
            *ready = Some(buffer);
            self.has_ready.store(true, Ordering::Release);
        } else {
            // A newer capture landed while the upload was failing; it wins.
            drop(ready);
            self.stash_recycle(buffer);
        }
        let _ = self.transition(SlotState::Uploading, SlotState::CaptureReady);
    }

    /// Record a completed upload, retaining the buffer for pixel queries.
    pub fn finish_upload(&self, buffer: CaptureBuffer) {
        let displaced = self.retained.lock().replace(buffer);
        if let Some(displaced) = displaced {
            self.stash_recycle(displaced);
        }
        let _ = self.transition(SlotState::Uploading, SlotState::Uploaded);
    }

    /// Settle `Uploaded` back to `Idle`; called when the scheduler next
    /// looks at the slot.
    pub fn settle(&self) {
        let _ = self.transition(SlotState::Uploaded, SlotState::Idle);
    }

    /// Take a spare allocation for the next capture to write into.
    pub fn take_recycle(&self) -> Option<CaptureBuffer> {
        self.recycle.lock().take()
    }

    fn stash_recycle(&self, buffer: CaptureBuffer) {
        let mut recycle = self.recycle.lock();
        if recycle.is_none() {
            *recycle = Some(buffer);
        }
    }

    /// Terminal transition; drops all buffers and the GPU texture.
    pub fn mark_removed(&self) {
        self.store_state(SlotState::Removed);
        self.clear_buffers();
        *self.texture.lock() = None;
        self.buffer_width.store(0, Ordering::Release);
        self.buffer_height.store(0, Ordering::Release);
    }

    fn clear_buffers(&self) {
        *self.ready.lock() = None;
        *self.retained.lock() = None;
        *self.recycle.lock() = None;
        self.has_ready.store(false, Ordering::Release);
    }

    /// Width of the most recently published buffer.
    pub fn buffer_width(&self) -> u32 {
        self.buffer_width.load(Ordering::Acquire)
    }

    /// Height of the most recently published buffer.
    pub fn buffer_height(&self) -> u32 {
        self.buffer_height.load(Ordering::Acquire)
    }

    /// Run `f` against the GPU texture cell (render thread only).
    pub fn with_texture<R>(&self, f: impl FnOnce(&mut Option<Box<dyn GpuTexture>>) -> R) -> R {
        f(&mut self.texture.lock())
    }

    /// Opaque GPU texture pointer for the host; null before first upload.
    pub fn native_handle(&self) -> *mut c_void {
        self.texture
            .lock()
            .as_ref()
            .map_or(std::ptr::null_mut(), |t| t.native_handle())
    }

    /// Packed BGRA pixel from the newest available CPU buffer.
    pub fn read_pixel(&self, x: u32, y: u32) -> Option<u32> {
        if let Some(ref buffer) = *self.ready.lock() {
            return buffer.pixel(x, y);
        }
        self.retained.lock().as_ref()?.pixel(x, y)
    }

    /// Copy a region from the newest available CPU buffer.
    pub fn copy_pixels(&self, out: &mut Vec<u8>, x: u32, y: u32, width: u32, height: u32) -> bool {
        if let Some(ref buffer) = *self.ready.lock() {
            return buffer.copy_region(out, x, y, width, height);
        }
        self.retained
            .lock()
            .as_ref()
            .is_some_and(|buffer| buffer.copy_region(out, x, y, width, height))
    }
}
