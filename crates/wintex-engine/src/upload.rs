//! Render-thread texture uploads with a per-frame budget.

use tracing::warn;

use crate::registry::WindowRegistry;
use crate::texture::TextureSlot;
use wintex_capture::GpuDevice;

/// Drains completed captures into GPU textures, at most `budget` uploads
/// per render tick. Leftover windows keep their ready buffer and are
/// served first on the next tick via a rotating start index.
pub struct UploadManager {
    budget: usize,
    rotation: usize,
}

impl UploadManager {
    pub fn new(budget: usize) -> Self {
        Self {
            budget: budget.max(1),
            rotation: 0,
        }
    }

    /// Run one upload pass. Render thread only.
    pub fn run(&mut self, registry: &WindowRegistry, cursor_slot: &TextureSlot, gpu: &dyn GpuDevice) {
        let mut remaining = self.budget;

        // The cursor is a single small texture; serve it first so pointer
        // feedback never waits behind a pile of dirty windows.
        if cursor_slot.has_ready() && upload_slot(cursor_slot, gpu) {
            remaining -= 1;
        }

        let ids = registry.ids_sorted();
        if ids.is_empty() {
            return;
        }

        let n = ids.len();
        let start = self.rotation % n;
        for k in 0..n {
            if remaining == 0 {
                // Budget exhausted: resume here next tick.
                self.rotation = (start + k) % n;
                return;
            }
            let Some(entry) = registry.get(ids[(start + k) % n]) else {
                continue;
            };
            for slot in [entry.content(), entry.icon()] {
                if remaining == 0 {
                    break;
                }
                if slot.has_ready() && upload_slot(slot, gpu) {
                    remaining -= 1;
                }
            }
        }
        self.rotation = start;
    }
}

/// Upload one slot's ready buffer, (re)creating the texture on dimension
/// change. Returns whether an upload happened.
fn upload_slot(slot: &TextureSlot, gpu: &dyn GpuDevice) -> bool {
    let Some(buffer) = slot.take_ready() else {
        return false;
    };

    let result = slot.with_texture(|texture| match texture.as_mut() {
        Some(existing)
            if existing.width() == buffer.width() && existing.height() == buffer.height() =>
        {
            existing.upload(&buffer)
        }
        _ => {
            let mut fresh = gpu.create_texture(buffer.width(), buffer.height())?;
            let uploaded = fresh.upload(&buffer);
            *texture = Some(fresh);
            uploaded
        }
    });

    match result {
        Ok(()) => {
            slot.finish_upload(buffer);
            true
        }
        Err(e) => {
            // Texture stays at its previous state; the buffer goes back so
            // the next tick retries.
            warn!("texture upload failed, will retry: {e}");
            slot.restore_ready(buffer);
            false
        }
    }
}
