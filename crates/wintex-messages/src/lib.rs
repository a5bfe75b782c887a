//! Lifecycle messages and shared enums for the wintex capture engine.
//!
//! The engine reports window lifecycle and capture progress through a
//! bounded [`MessageQueue`] that the host drains once per frame.

mod message;
mod types;

pub use message::{Message, MessageKind, MessageQueue};
pub use types::{CaptureMode, CapturePriority};

/// Default capacity of the lifecycle message ring.
pub const DEFAULT_MESSAGE_CAPACITY: usize = 256;

/// Window id used in messages that do not refer to a window (e.g. cursor).
pub const NO_WINDOW_ID: i32 = -1;
