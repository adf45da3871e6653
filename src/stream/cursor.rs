//! Named read cursors
//!
//! Each consumer keeps its own position in the stream's index space.
//! Positions are plain atomics, so a real-time consumer can read and move
//! its cursor without touching the registry lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Result, SampleSlice, SampleStream, SliceInfo, StreamError};

/// Shared state behind every handle of one named cursor
pub(crate) struct CursorState {
    pub name: String,
    index: AtomicU64,
    /// When the index was last set, nanoseconds since the stream epoch
    timestamp_ns: AtomicU64,
}

impl CursorState {
    pub fn new(name: &str, index: u64, timestamp_ns: u64) -> Self {
        Self {
            name: name.to_string(),
            index: AtomicU64::new(index),
            timestamp_ns: AtomicU64::new(timestamp_ns),
        }
    }

    pub fn index(&self) -> u64 {
        self.index.load(Ordering::Acquire)
    }
}

/// Which sides of the stream to assume are still moving when estimating lag
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LagOptions {
    /// Add the time since the last write (the producer has kept going)
    pub writer_moving: bool,
    /// Subtract the time since the cursor was last set (so has the reader)
    pub reader_moving: bool,
}

impl Default for LagOptions {
    fn default() -> Self {
        Self {
            writer_moving: true,
            reader_moving: true,
        }
    }
}

/// A consumer's position in a [`SampleStream`]
///
/// Moving one cursor never affects another cursor or the writer.
#[derive(Clone)]
pub struct ReadCursor {
    stream: Arc<SampleStream>,
    state: Arc<CursorState>,
}

impl ReadCursor {
    pub(crate) fn new(stream: Arc<SampleStream>, state: Arc<CursorState>) -> Self {
        Self { stream, state }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn stream(&self) -> &Arc<SampleStream> {
        &self.stream
    }

    pub fn index(&self) -> u64 {
        self.state.index()
    }

    /// Move the cursor and record when it moved
    pub fn set_index(&self, index: u64) {
        self.state
            .timestamp_ns
            .store(self.stream.now_ns(), Ordering::Relaxed);
        self.state.index.store(index, Ordering::Release);
    }

    /// When the cursor was last moved
    pub fn index_timestamp(&self) -> Instant {
        self.stream
            .instant_at(self.state.timestamp_ns.load(Ordering::Relaxed))
    }

    /// Number of written slices the cursor has not consumed yet
    pub fn pending(&self) -> u64 {
        self.stream.write_index().saturating_sub(self.index())
    }

    /// Read the slice at the cursor and advance past it
    pub fn read_next(&self) -> Result<SampleSlice> {
        let index = self.index();
        let slice = self.stream.read(index)?;
        self.set_index(index + 1);
        Ok(slice)
    }

    /// Like [`read_next`](Self::read_next), copying into `out` without allocating
    pub fn read_next_into(&self, out: &mut [f32]) -> Result<SliceInfo> {
        let index = self.index();
        let info = self.stream.read_into(index, out)?;
        self.set_index(index + 1);
        Ok(info)
    }

    /// Move a cursor that fell out of the retained window to the oldest
    /// retained slice. Returns the number of slices skipped.
    pub fn catch_up_to_oldest(&self) -> u64 {
        let oldest = self.stream.oldest_index();
        let index = self.index();
        if index < oldest {
            self.set_index(oldest);
            oldest - index
        } else {
            0
        }
    }

    /// Estimate how far behind the writer this cursor is reading
    ///
    /// Counts the samples between the cursor and the writer at
    /// `sample_rate`, then corrects for the time elapsed since each side
    /// last moved as selected by `options`. Never negative.
    pub fn lag(&self, sample_rate: u32, options: LagOptions) -> Result<Duration> {
        if sample_rate == 0 {
            return Err(StreamError::InvalidConfig("sample_rate must be at least 1"));
        }

        let offset = self.stream.sample_offset_of(self.index())?;
        let behind = self.stream.samples_written().saturating_sub(offset);
        let mut seconds = behind as f64 / sample_rate as f64;

        let now = self.stream.now_ns();
        if options.writer_moving {
            let last_write = self.stream.last_write_ns.load(Ordering::Acquire);
            seconds += now.saturating_sub(last_write) as f64 * 1e-9;
        }
        if options.reader_moving {
            let moved = self.state.timestamp_ns.load(Ordering::Relaxed);
            seconds -= now.saturating_sub(moved) as f64 * 1e-9;
        }

        Ok(Duration::from_secs_f64(seconds.max(0.0)))
    }
}
