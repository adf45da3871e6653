//! Storage slot for one sample slice
//!
//! Each slot is a small seqlock. The writer marks the slot as "being
//! written for index i", stores the samples and metadata, then marks it
//! "complete for index i". A reader that sees the same complete tag before
//! and after copying knows the copy is not torn.
//!
//! Samples are stored as `AtomicU32` bit patterns so that concurrent
//! access is never a data race, even when a reader loses the race against
//! an overwrite.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, AtomicUsize, Ordering};

/// Tag a slot carries once the write for `index` has completed.
#[inline]
fn complete_tag(index: u64) -> u64 {
    (index + 1) * 2
}

/// Tag a slot carries while the write for `index` is in progress (odd).
#[inline]
fn writing_tag(index: u64) -> u64 {
    index * 2 + 1
}

/// Metadata copied out of a slot alongside its samples
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SlotMeta {
    /// Write timestamp, nanoseconds since the stream epoch
    pub timestamp_ns: u64,
    /// Total samples written before this slice
    pub sample_offset: u64,
    /// Number of valid samples in the slot
    pub len: usize,
}

/// Outcome of a validated slot read
pub(crate) enum SlotRead {
    /// The slot held the requested index for the whole copy
    Intact(SlotMeta),
    /// The slot holds (or is being overwritten with) a different index
    Overwritten,
}

#[repr(align(64))]
pub(crate) struct Slot {
    seq: AtomicU64,
    timestamp_ns: AtomicU64,
    sample_offset: AtomicU64,
    len: AtomicUsize,
    samples: Box<[AtomicU32]>,
}

impl Slot {
    pub fn new(slice_len: usize) -> Self {
        Self {
            seq: AtomicU64::new(0),
            timestamp_ns: AtomicU64::new(0),
            sample_offset: AtomicU64::new(0),
            len: AtomicUsize::new(0),
            samples: (0..slice_len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Store a slice for `index`. Only the single writer calls this.
    ///
    /// Returns the number of samples stored (capped at the slot size).
    pub fn store<I>(&self, index: u64, samples: I, timestamp_ns: u64, sample_offset: u64) -> usize
    where
        I: IntoIterator<Item = f32>,
    {
        self.seq.store(writing_tag(index), Ordering::Relaxed);
        fence(Ordering::Release);

        let mut len = 0;
        for (cell, sample) in self.samples.iter().zip(samples) {
            cell.store(sample.to_bits(), Ordering::Relaxed);
            len += 1;
        }
        self.len.store(len, Ordering::Relaxed);
        self.timestamp_ns.store(timestamp_ns, Ordering::Relaxed);
        self.sample_offset.store(sample_offset, Ordering::Relaxed);

        self.seq.store(complete_tag(index), Ordering::Release);
        len
    }

    /// Copy the slot for `index` into `out`, validating the sequence tag.
    ///
    /// At most `out.len()` samples are copied; `SlotMeta::len` reports how
    /// many the slot held.
    pub fn load_into(&self, index: u64, out: &mut [f32]) -> SlotRead {
        let expected = complete_tag(index);
        if self.seq.load(Ordering::Acquire) != expected {
            return SlotRead::Overwritten;
        }

        let len = self.len.load(Ordering::Relaxed).min(self.samples.len());
        for (dst, cell) in out.iter_mut().zip(&self.samples[..len]) {
            *dst = f32::from_bits(cell.load(Ordering::Relaxed));
        }
        let meta = SlotMeta {
            timestamp_ns: self.timestamp_ns.load(Ordering::Relaxed),
            sample_offset: self.sample_offset.load(Ordering::Relaxed),
            len,
        };

        fence(Ordering::Acquire);
        if self.seq.load(Ordering::Relaxed) != expected {
            return SlotRead::Overwritten;
        }
        SlotRead::Intact(meta)
    }

    /// Read only the metadata for `index`.
    pub fn load_meta(&self, index: u64) -> SlotRead {
        self.load_into(index, &mut [])
    }
}
