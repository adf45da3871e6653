//! scope-stream - shared sample history for real-time audio
//!
//! An audio producer appends slices of samples to a bounded stream while
//! any number of consumers (a renderer, a second audio callback) read them
//! back concurrently at their own pace.
//!
//! - [`stream`]: the sample stream, its single writer and read cursors
//! - [`playhead`]: continuous playback from the stream
//! - [`monitor`]: periodic level and lag summaries
//! - [`source`]: synthetic tone producer
//! - [`audio`]: cpal capture/playback session
//! - [`settings`]: persisted configuration

pub mod audio;
pub mod monitor;
pub mod playhead;
pub mod settings;
pub mod source;
pub mod stream;
