//! Sample stream - bounded history of audio slices shared between threads
//!
//! One producer (usually an audio input callback) appends slices of mono
//! samples. Any number of consumers read them back by their position in a
//! monotonic index space, each at its own pace.
//!
//! ## Design Notes
//!
//! - The producer never blocks and never allocates. Storage for every slot
//!   is allocated up front.
//! - A slot is fully written before the write cursor is published, and each
//!   slot carries a sequence tag, so readers never observe a torn slice.
//! - Only the most recent `capacity` slices are retained. Older indices are
//!   reported as [`StreamError::Stale`].
//!
//! ## Example
//!
//! ```
//! use scope_stream::stream::{SampleStream, StreamConfig};
//!
//! let (mut writer, stream) = SampleStream::new(StreamConfig::new(4, 2)).unwrap();
//! writer.write(&[0.1, 0.2]);
//!
//! let slice = stream.read(0).unwrap();
//! assert_eq!(slice.samples, vec![0.1, 0.2]);
//! ```

mod cursor;
mod error;
mod slot;

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use cursor::{LagOptions, ReadCursor};
pub use error::{Result, StreamError};

use cursor::CursorState;
use slot::{Slot, SlotMeta, SlotRead};

/// Sample stream configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Number of slices retained
    pub capacity: usize,
    /// Maximum number of samples in one slice
    pub slice_len: usize,
}

impl StreamConfig {
    pub fn new(capacity: usize, slice_len: usize) -> Self {
        Self {
            capacity,
            slice_len,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(StreamError::InvalidConfig("capacity must be at least 1"));
        }
        if self.slice_len == 0 {
            return Err(StreamError::InvalidConfig("slice_len must be at least 1"));
        }
        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        // 256 * 1024 samples is a little under 6 seconds at 44.1 kHz
        Self {
            capacity: 256,
            slice_len: 1024,
        }
    }
}

/// A slice copied out of the stream
#[derive(Clone, Debug, PartialEq)]
pub struct SampleSlice {
    /// Position in the stream's index space
    pub index: u64,
    /// When the producer wrote this slice
    pub timestamp: Instant,
    /// Total number of samples written before this slice
    pub sample_offset: u64,
    pub samples: Vec<f32>,
}

/// Metadata for a slice copied with [`SampleStream::read_into`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceInfo {
    pub index: u64,
    pub timestamp: Instant,
    pub sample_offset: u64,
    /// Number of samples the slice holds (may exceed what was copied)
    pub len: usize,
}

/// Shared side of the stream, read by any number of consumers
pub struct SampleStream {
    slots: Box<[Slot]>,
    slice_len: usize,
    /// Next index to be written; published after the slot is complete
    write_index: AtomicU64,
    samples_written: AtomicU64,
    last_write_ns: AtomicU64,
    truncated_writes: AtomicU64,
    closed: AtomicBool,
    epoch: Instant,
    cursors: Mutex<Vec<Arc<CursorState>>>,
}

impl SampleStream {
    /// Create a stream and its single writer
    ///
    /// The writer is the only way to append to the stream. Consumers share
    /// the returned `Arc`.
    pub fn new(config: StreamConfig) -> Result<(StreamWriter, Arc<SampleStream>)> {
        config.validate()?;

        let slots = (0..config.capacity)
            .map(|_| Slot::new(config.slice_len))
            .collect();
        let stream = Arc::new(SampleStream {
            slots,
            slice_len: config.slice_len,
            write_index: AtomicU64::new(0),
            samples_written: AtomicU64::new(0),
            last_write_ns: AtomicU64::new(0),
            truncated_writes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            epoch: Instant::now(),
            cursors: Mutex::new(Vec::new()),
        });

        log::debug!(
            "Created sample stream: {} slices of {} samples",
            config.capacity,
            config.slice_len
        );

        let writer = StreamWriter {
            stream: Arc::clone(&stream),
            next_index: 0,
            samples_written: 0,
        };
        Ok((writer, stream))
    }

    /// Number of slices retained
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Maximum samples per slice
    pub fn slice_len(&self) -> usize {
        self.slice_len
    }

    /// Index the next write will occupy
    pub fn write_index(&self) -> u64 {
        self.write_index.load(Ordering::Acquire)
    }

    /// Oldest index that is still retained
    pub fn oldest_index(&self) -> u64 {
        self.write_index().saturating_sub(self.capacity() as u64)
    }

    /// Number of slices currently retained
    pub fn len(&self) -> usize {
        (self.write_index() as usize).min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.write_index() == 0
    }

    /// Total samples written since creation
    pub fn samples_written(&self) -> u64 {
        self.samples_written.load(Ordering::Acquire)
    }

    /// How many writes were longer than `slice_len` and got truncated
    pub fn truncated_writes(&self) -> u64 {
        self.truncated_writes.load(Ordering::Relaxed)
    }

    /// Whether the writer has been closed or dropped
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Timestamp of the most recent write
    ///
    /// Before the first write this is the moment the stream was created.
    pub fn last_write_timestamp(&self) -> Instant {
        self.instant_at(self.last_write_ns.load(Ordering::Acquire))
    }

    /// Copy the slice at `index`
    pub fn read(&self, index: u64) -> Result<SampleSlice> {
        let mut samples = vec![0.0; self.slice_len];
        let info = self.read_into(index, &mut samples)?;
        samples.truncate(info.len);
        Ok(SampleSlice {
            index,
            timestamp: info.timestamp,
            sample_offset: info.sample_offset,
            samples,
        })
    }

    /// Copy the slice at `index` into `out` without allocating
    ///
    /// Copies `min(slice length, out.len())` samples. Safe to call from a
    /// real-time thread.
    pub fn read_into(&self, index: u64, out: &mut [f32]) -> Result<SliceInfo> {
        self.check_index(index)?;

        match self.slot(index).load_into(index, out) {
            SlotRead::Intact(meta) => Ok(self.info(index, meta)),
            SlotRead::Overwritten => Err(StreamError::Stale {
                index,
                oldest: self.oldest_index(),
            }),
        }
    }

    /// Copy every retained slice in `range`, oldest first
    ///
    /// The range is clamped to the retained window. Slices overwritten
    /// while the copy is in progress are left out.
    pub fn read_range(&self, range: Range<u64>) -> Vec<SampleSlice> {
        let write_index = self.write_index();
        let oldest = write_index.saturating_sub(self.capacity() as u64);
        let start = range.start.max(oldest);
        let end = range.end.min(write_index);

        (start..end).filter_map(|i| self.read(i).ok()).collect()
    }

    /// Copy the newest `count` retained slices, oldest first
    pub fn read_recent(&self, count: usize) -> Vec<SampleSlice> {
        let write_index = self.write_index();
        let count = count.min(self.capacity()) as u64;
        self.read_range(write_index.saturating_sub(count)..write_index)
    }

    /// Time between the write at `index` and the most recent write
    pub fn time_span(&self, index: u64) -> Result<Duration> {
        let meta = self.meta(index)?;
        let last = self.last_write_ns.load(Ordering::Acquire);
        Ok(Duration::from_nanos(last.saturating_sub(meta.timestamp_ns)))
    }

    /// Get or create the read cursor called `name`
    ///
    /// A new cursor starts at the current write index. Handles created
    /// with the same name share one position.
    pub fn cursor(self: &Arc<Self>, name: &str) -> ReadCursor {
        let mut cursors = self.lock_cursors();
        let state = match cursors.iter().find(|c| c.name == name) {
            Some(state) => Arc::clone(state),
            None => {
                let state = Arc::new(CursorState::new(
                    name,
                    self.write_index(),
                    self.now_ns(),
                ));
                cursors.push(Arc::clone(&state));
                log::debug!("Registered read cursor '{}'", name);
                state
            }
        };
        ReadCursor::new(Arc::clone(self), state)
    }

    /// Names of all registered cursors
    pub fn cursor_names(&self) -> Vec<String> {
        self.lock_cursors().iter().map(|c| c.name.clone()).collect()
    }

    /// Current index of the cursor called `name`
    pub fn cursor_index(&self, name: &str) -> Option<u64> {
        self.lock_cursors()
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.index())
    }

    /// Unregister a cursor. Existing handles keep working but are no
    /// longer listed.
    pub fn remove_cursor(&self, name: &str) -> bool {
        let mut cursors = self.lock_cursors();
        let before = cursors.len();
        cursors.retain(|c| c.name != name);
        cursors.len() != before
    }

    fn lock_cursors(&self) -> std::sync::MutexGuard<'_, Vec<Arc<CursorState>>> {
        // The registry holds plain data, so a panic elsewhere can't leave
        // it inconsistent
        self.cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, index: u64) -> &Slot {
        &self.slots[(index % self.capacity() as u64) as usize]
    }

    /// Reject indices outside the retained window
    fn check_index(&self, index: u64) -> Result<()> {
        loop {
            let write_index = self.write_index();
            if index >= write_index {
                if !self.is_closed() {
                    return Err(StreamError::NotYetWritten {
                        index,
                        next: write_index,
                    });
                }
                // A final write may have landed before the close
                if index < self.write_index() {
                    continue;
                }
                return Err(StreamError::Closed { index });
            }

            let oldest = write_index.saturating_sub(self.capacity() as u64);
            if index < oldest {
                return Err(StreamError::Stale { index, oldest });
            }
            return Ok(());
        }
    }

    fn meta(&self, index: u64) -> Result<SlotMeta> {
        self.check_index(index)?;
        match self.slot(index).load_meta(index) {
            SlotRead::Intact(meta) => Ok(meta),
            SlotRead::Overwritten => Err(StreamError::Stale {
                index,
                oldest: self.oldest_index(),
            }),
        }
    }

    /// Sample position where the slice at `index` starts
    ///
    /// `write_index()` itself is accepted and maps to the total sample count.
    pub(crate) fn sample_offset_of(&self, index: u64) -> Result<u64> {
        if index == self.write_index() {
            return Ok(self.samples_written());
        }
        self.meta(index).map(|meta| meta.sample_offset)
    }

    fn info(&self, index: u64, meta: SlotMeta) -> SliceInfo {
        SliceInfo {
            index,
            timestamp: self.instant_at(meta.timestamp_ns),
            sample_offset: meta.sample_offset,
            len: meta.len,
        }
    }

    pub(crate) fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    pub(crate) fn instant_at(&self, ns: u64) -> Instant {
        self.epoch + Duration::from_nanos(ns)
    }
}

/// The single producer of a [`SampleStream`]
///
/// Not `Clone`: exactly one writer exists per stream. Dropping it closes
/// the stream.
pub struct StreamWriter {
    stream: Arc<SampleStream>,
    next_index: u64,
    samples_written: u64,
}

impl StreamWriter {
    /// Append `slice` as the newest entry
    ///
    /// Overwrites the oldest slice when the stream is full. Samples beyond
    /// `slice_len` are dropped and the write is counted as truncated.
    pub fn write(&mut self, slice: &[f32]) {
        if slice.len() > self.stream.slice_len {
            self.stream.truncated_writes.fetch_add(1, Ordering::Relaxed);
        }
        self.write_iter(slice.iter().copied());
    }

    /// Append up to `slice_len` samples pulled from `samples`
    ///
    /// Lets a callback convert or downmix straight into the stream.
    /// Returns the number of samples stored.
    pub fn write_iter<I>(&mut self, samples: I) -> usize
    where
        I: IntoIterator<Item = f32>,
    {
        let index = self.next_index;
        let timestamp_ns = self.stream.now_ns();
        let stored =
            self.stream
                .slot(index)
                .store(index, samples, timestamp_ns, self.samples_written);

        self.samples_written += stored as u64;
        self.next_index += 1;

        self.stream
            .samples_written
            .store(self.samples_written, Ordering::Release);
        self.stream
            .last_write_ns
            .store(timestamp_ns, Ordering::Release);
        // Publishing the index makes the slot visible to readers
        self.stream
            .write_index
            .store(self.next_index, Ordering::Release);
        stored
    }

    /// Index the next write will occupy
    pub fn write_index(&self) -> u64 {
        self.next_index
    }

    /// The shared side of this stream
    pub fn stream(&self) -> &Arc<SampleStream> {
        &self.stream
    }

    /// Close the stream. Readers see [`StreamError::Closed`] past the end.
    pub fn close(self) {
        // Drop does the work
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.stream.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn stream(capacity: usize, slice_len: usize) -> (StreamWriter, Arc<SampleStream>) {
        SampleStream::new(StreamConfig::new(capacity, slice_len)).unwrap()
    }

    #[test]
    fn test_rejects_empty_config() {
        assert!(matches!(
            SampleStream::new(StreamConfig::new(0, 16)),
            Err(StreamError::InvalidConfig(_))
        ));
        assert!(matches!(
            SampleStream::new(StreamConfig::new(16, 0)),
            Err(StreamError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_write_index_counts_writes() {
        let (mut writer, stream) = stream(3, 2);
        assert_eq!(stream.write_index(), 0);
        assert!(stream.is_empty());

        for k in 1..=10 {
            writer.write(&[k as f32]);
            assert_eq!(stream.write_index(), k);
            assert_eq!(writer.write_index(), k);
        }
        assert_eq!(stream.len(), 3);
        assert_eq!(stream.oldest_index(), 7);
    }

    #[test]
    fn test_window_of_five_writes_into_four_slots() {
        let (mut writer, stream) = stream(4, 1);
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            writer.write(&[value]);
        }

        assert_eq!(stream.write_index(), 5);
        assert_eq!(
            stream.read(0),
            Err(StreamError::Stale { index: 0, oldest: 1 })
        );
        assert_eq!(stream.read(1).unwrap().samples, vec![2.0]);
        assert_eq!(stream.read(4).unwrap().samples, vec![5.0]);
        assert_eq!(
            stream.read(5),
            Err(StreamError::NotYetWritten { index: 5, next: 5 })
        );
    }

    #[test]
    fn test_every_retained_index_reads_back() {
        let (mut writer, stream) = stream(8, 3);
        for i in 0..20u64 {
            let v = i as f32;
            writer.write(&[v, v + 0.5, v + 0.25]);
        }

        for i in 12..20 {
            let slice = stream.read(i).unwrap();
            assert_eq!(slice.index, i);
            assert_eq!(slice.samples[0], i as f32);
            assert_eq!(slice.sample_offset, i * 3);
        }
        for i in 0..12 {
            assert!(matches!(stream.read(i), Err(StreamError::Stale { .. })));
        }
    }

    #[test]
    fn test_short_slices_keep_their_length() {
        let (mut writer, stream) = stream(2, 8);
        writer.write(&[1.0, 2.0]);
        writer.write(&[]);

        assert_eq!(stream.read(0).unwrap().samples, vec![1.0, 2.0]);
        assert!(stream.read(1).unwrap().samples.is_empty());
        assert_eq!(stream.samples_written(), 2);
    }

    #[test]
    fn test_long_slice_is_truncated() {
        let (mut writer, stream) = stream(2, 2);
        writer.write(&[1.0, 2.0, 3.0]);

        assert_eq!(stream.read(0).unwrap().samples, vec![1.0, 2.0]);
        assert_eq!(stream.truncated_writes(), 1);
        assert_eq!(stream.samples_written(), 2);
    }

    #[test]
    fn test_write_iter_converts_in_place() {
        let (mut writer, stream) = stream(2, 4);
        let raw: [i16; 3] = [i16::MAX, 0, i16::MIN];
        let stored = writer.write_iter(raw.iter().map(|&s| s as f32 / 32768.0));

        assert_eq!(stored, 3);
        let slice = stream.read(0).unwrap();
        assert_eq!(slice.samples[1], 0.0);
        assert_eq!(slice.samples[2], -1.0);
    }

    #[test]
    fn test_read_into_copies_prefix() {
        let (mut writer, stream) = stream(2, 4);
        writer.write(&[1.0, 2.0, 3.0, 4.0]);

        let mut out = [0.0; 2];
        let info = stream.read_into(0, &mut out).unwrap();
        assert_eq!(info.len, 4);
        assert_eq!(out, [1.0, 2.0]);
    }

    #[test]
    fn test_read_range_clamps_to_window() {
        let (mut writer, stream) = stream(4, 1);
        for i in 0..6 {
            writer.write(&[i as f32]);
        }

        let indices: Vec<u64> = stream.read_range(0..100).iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![2, 3, 4, 5]);

        let indices: Vec<u64> = stream.read_range(3..5).iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![3, 4]);

        assert!(stream.read_range(10..20).is_empty());
    }

    #[test]
    fn test_read_recent() {
        let (mut writer, stream) = stream(4, 1);
        for i in 0..6 {
            writer.write(&[i as f32]);
        }

        let recent = stream.read_recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].samples, vec![4.0]);
        assert_eq!(recent[1].samples, vec![5.0]);
        assert_eq!(stream.read_recent(100).len(), 4);
    }

    #[test]
    fn test_timestamps_and_time_span() {
        let (mut writer, stream) = stream(4, 1);
        let created = stream.last_write_timestamp();

        writer.write(&[0.0]);
        thread::sleep(Duration::from_millis(20));
        writer.write(&[1.0]);

        let first = stream.read(0).unwrap();
        let second = stream.read(1).unwrap();
        assert!(first.timestamp >= created);
        assert!(second.timestamp > first.timestamp);
        assert_eq!(stream.last_write_timestamp(), second.timestamp);

        let span = stream.time_span(0).unwrap();
        assert!(span >= Duration::from_millis(20));
        assert_eq!(stream.time_span(1).unwrap(), Duration::ZERO);
        assert!(matches!(
            stream.time_span(2),
            Err(StreamError::NotYetWritten { .. })
        ));
    }

    #[test]
    fn test_close_on_drop() {
        let (mut writer, stream) = stream(2, 1);
        writer.write(&[1.0]);
        assert!(!stream.is_closed());

        writer.close();
        assert!(stream.is_closed());
        assert_eq!(stream.read(0).unwrap().samples, vec![1.0]);
        assert_eq!(stream.read(1), Err(StreamError::Closed { index: 1 }));
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_slices() {
        const SLICE_LEN: usize = 64;
        const WRITES: u64 = 20_000;
        const READERS: usize = 4;

        let (mut writer, stream) = stream(8, SLICE_LEN);
        let barrier = Arc::new(Barrier::new(READERS + 1));

        let readers: Vec<_> = (0..READERS)
            .map(|_| {
                let stream = Arc::clone(&stream);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut checked = 0u64;
                    let mut out = [0.0f32; SLICE_LEN];
                    loop {
                        // One last read after the close sees a quiet stream
                        let closed = stream.is_closed();
                        let newest = stream.write_index();
                        if newest == 0 {
                            continue;
                        }
                        let index = newest - 1;
                        match stream.read_into(index, &mut out) {
                            Ok(info) => {
                                // Every sample of slice i holds the value i
                                assert_eq!(info.len, SLICE_LEN);
                                assert!(out.iter().all(|&s| s == index as f32));
                                assert_eq!(info.sample_offset, index * SLICE_LEN as u64);
                                checked += 1;
                            }
                            Err(StreamError::Stale { .. }) => {}
                            Err(e) => panic!("unexpected read error: {e}"),
                        }
                        if closed {
                            break;
                        }
                    }
                    checked
                })
            })
            .collect();

        barrier.wait();
        for i in 0..WRITES {
            writer.write_iter(std::iter::repeat(i as f32).take(SLICE_LEN));
        }
        writer.close();

        let checked: u64 = readers.into_iter().map(|r| r.join().unwrap()).sum();
        assert!(checked > 0);
        assert_eq!(stream.write_index(), WRITES);
    }
}
