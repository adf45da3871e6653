//! Audio module - connects audio devices to the sample stream
//!
//! This module provides:
//! - Audio session for cpal capture and playback
//! - Lock-free event queue out of the audio callbacks
//! - Callback interval statistics

mod engine;
mod events;
mod timing;

// Re-export public types
pub use engine::{AudioError, AudioSession};
pub use events::{event_queue, AudioEvent, EventReceiver, EventSender, EVENT_QUEUE_CAPACITY};
pub use timing::{CallReport, CallStats};
