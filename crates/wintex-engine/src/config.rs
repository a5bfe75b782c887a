//! Engine configuration.

use serde::{Deserialize, Serialize};

use wintex_messages::DEFAULT_MESSAGE_CAPACITY;

/// Tunables for the capture engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capture worker threads, clamped to 1..=4. The pool bound is also
    /// what limits the damage of a backend call that never returns.
    pub worker_threads: usize,

    /// Milliseconds between window-tree rescans.
    pub rescan_interval_ms: u64,

    /// Maximum texture uploads per render tick. Windows left over carry
    /// their ready buffer into the next tick.
    pub upload_budget: usize,

    /// Capacity of the lifecycle message ring.
    pub message_capacity: usize,

    /// Visible windows enqueued per low-priority sweep.
    pub sweep_batch: usize,

    /// Seconds between low-priority sweeps; 0 sweeps every update tick.
    pub sweep_interval: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            rescan_interval_ms: 100,
            upload_budget: 8,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            sweep_batch: 2,
            sweep_interval: 0.0,
        }
    }
}

impl EngineConfig {
    /// Worker thread count with the documented clamp applied.
    pub fn effective_workers(&self) -> usize {
        self.worker_threads.clamp(1, 4)
    }
}
