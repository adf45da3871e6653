//! Playhead - turns the slice stream back into a continuous signal
//!
//! An output audio callback asks for a fixed number of samples that rarely
//! lines up with slice boundaries. The playhead keeps the partially played
//! slice in a preallocated buffer and carries on from there next time.

use std::sync::Arc;

use crate::stream::{ReadCursor, SampleStream, StreamError};

/// What happened during one [`Playhead::fill`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillReport {
    /// Samples copied from the stream
    pub written: usize,
    /// Samples filled with silence because the stream ran dry
    pub silence: usize,
    /// Slices jumped over because the cursor fell out of the window
    pub skipped: u64,
}

/// Sequential reader that fills output buffers from a stream
pub struct Playhead {
    cursor: ReadCursor,
    current: Vec<f32>,
    position: usize,
    len: usize,
}

impl Playhead {
    /// Create a playhead reading through the cursor called `name`
    pub fn new(stream: &Arc<SampleStream>, name: &str) -> Self {
        Self {
            cursor: stream.cursor(name),
            current: vec![0.0; stream.slice_len()],
            position: 0,
            len: 0,
        }
    }

    pub fn cursor(&self) -> &ReadCursor {
        &self.cursor
    }

    /// Samples left over from the slice currently being played
    pub fn buffered(&self) -> usize {
        self.len - self.position
    }

    /// Fill `out` with the next samples of the stream
    ///
    /// Never allocates. Falls forward to the oldest retained slice when the
    /// cursor is stale, and pads with zeros once no more data is available.
    pub fn fill(&mut self, out: &mut [f32]) -> FillReport {
        let mut report = FillReport::default();

        while report.written < out.len() {
            if self.position < self.len {
                let n = (self.len - self.position).min(out.len() - report.written);
                out[report.written..report.written + n]
                    .copy_from_slice(&self.current[self.position..self.position + n]);
                self.position += n;
                report.written += n;
                continue;
            }

            match self.cursor.read_next_into(&mut self.current) {
                Ok(info) => {
                    self.len = info.len.min(self.current.len());
                    self.position = 0;
                }
                Err(StreamError::Stale { .. }) => {
                    let skipped = self.cursor.catch_up_to_oldest();
                    if skipped == 0 {
                        // Overwritten mid-copy while still inside the window
                        self.cursor.set_index(self.cursor.index() + 1);
                        report.skipped += 1;
                    } else {
                        report.skipped += skipped;
                    }
                }
                Err(_) => {
                    out[report.written..].fill(0.0);
                    report.silence = out.len() - report.written;
                    break;
                }
            }
        }

        report
    }
}
