//! Cursor texture pipeline.
//!
//! One capture/upload slot for the system cursor icon, scheduled through
//! the capture manager like any window. The cursor *position* never goes
//! through the pipeline — it is a cheap synchronous OS query answered on
//! demand.

use std::ffi::c_void;
use std::sync::Arc;

use crate::texture::TextureSlot;

/// The single cursor entity.
pub struct CursorPipeline {
    slot: Arc<TextureSlot>,
}

impl Default for CursorPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorPipeline {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(TextureSlot::new()),
        }
    }

    /// The cursor's capture/upload slot, shared with the capture manager.
    pub fn slot(&self) -> &Arc<TextureSlot> {
        &self.slot
    }

    /// Width of the latest captured cursor image.
    pub fn texture_width(&self) -> u32 {
        self.slot.buffer_width()
    }

    /// Height of the latest captured cursor image.
    pub fn texture_height(&self) -> u32 {
        self.slot.buffer_height()
    }

    /// Opaque GPU texture pointer; null before the first upload.
    pub fn texture_handle(&self) -> *mut c_void {
        self.slot.native_handle()
    }
}
