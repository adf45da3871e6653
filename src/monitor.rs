//! Level monitor - a non-real-time consumer of the stream
//!
//! Stands where a renderer would sit: it wakes up periodically, drains
//! whatever was written since the last visit and summarises it.

use std::sync::Arc;
use std::time::Duration;

use crate::stream::{LagOptions, ReadCursor, SampleStream, StreamError};

/// Summary of the slices consumed by one [`Monitor::poll`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MonitorReport {
    pub slices: u64,
    pub samples: u64,
    /// Largest absolute sample value
    pub peak: f32,
    /// Root mean square over all samples
    pub rms: f32,
    /// Slices lost because the monitor fell out of the window
    pub skipped: u64,
    /// Estimated distance behind the writer after draining
    pub lag: Option<Duration>,
}

pub struct Monitor {
    cursor: ReadCursor,
    sample_rate: u32,
    scratch: Vec<f32>,
}

impl Monitor {
    pub fn new(stream: &Arc<SampleStream>, sample_rate: u32) -> Self {
        Self {
            cursor: stream.cursor("monitor"),
            sample_rate,
            scratch: vec![0.0; stream.slice_len()],
        }
    }

    pub fn cursor(&self) -> &ReadCursor {
        &self.cursor
    }

    /// Drain every slice written since the last poll
    pub fn poll(&mut self) -> MonitorReport {
        let mut report = MonitorReport::default();
        let mut sum_squares = 0.0f64;

        loop {
            match self.cursor.read_next_into(&mut self.scratch) {
                Ok(info) => {
                    let samples = &self.scratch[..info.len.min(self.scratch.len())];
                    for &s in samples {
                        report.peak = report.peak.max(s.abs());
                        sum_squares += (s as f64) * (s as f64);
                    }
                    report.slices += 1;
                    report.samples += samples.len() as u64;
                }
                Err(StreamError::Stale { .. }) => {
                    let skipped = self.cursor.catch_up_to_oldest();
                    if skipped == 0 {
                        self.cursor.set_index(self.cursor.index() + 1);
                        report.skipped += 1;
                    } else {
                        report.skipped += skipped;
                    }
                }
                Err(_) => break,
            }
        }

        if report.samples > 0 {
            report.rms = (sum_squares / report.samples as f64).sqrt() as f32;
        }
        report.lag = self
            .cursor
            .lag(self.sample_rate, LagOptions::default())
            .ok();

        if report.skipped > 0 {
            log::debug!("Monitor skipped {} stale slices", report.skipped);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamConfig;

    #[test]
    fn test_poll_summarises_levels() {
        let (mut writer, stream) = SampleStream::new(StreamConfig::new(8, 4)).unwrap();
        let mut monitor = Monitor::new(&stream, 48_000);
        writer.write(&[0.5, -0.5, 0.5, -0.5]);
        writer.write(&[-1.0, 1.0]);

        let report = monitor.poll();
        assert_eq!(report.slices, 2);
        assert_eq!(report.samples, 6);
        assert_eq!(report.peak, 1.0);
        let expected_rms = ((4.0 * 0.25 + 2.0) / 6.0f64).sqrt() as f32;
        assert!((report.rms - expected_rms).abs() < 1e-6);
        assert_eq!(report.skipped, 0);
        assert!(report.lag.is_some());

        // Nothing new since the last poll
        let report = monitor.poll();
        assert_eq!(report.slices, 0);
        assert_eq!(report.rms, 0.0);
    }

    #[test]
    fn test_poll_recovers_from_falling_behind() {
        let (mut writer, stream) = SampleStream::new(StreamConfig::new(2, 1)).unwrap();
        let mut monitor = Monitor::new(&stream, 48_000);
        for i in 0..6 {
            writer.write(&[i as f32 / 10.0]);
        }

        let report = monitor.poll();
        assert_eq!(report.skipped, 4);
        assert_eq!(report.slices, 2);
        assert_eq!(monitor.cursor().index(), 6);
    }
}
