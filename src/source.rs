//! Synthetic sample source
//!
//! Generates a test tone and feeds it into a stream at real-time pace,
//! standing in for an audio input callback when no capture device is
//! wanted.

use std::f32::consts::TAU;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::stream::StreamWriter;

/// Tone waveform shapes
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize, clap::ValueEnum)]
pub enum Waveform {
    /// Smooth sine wave
    Sine,
    /// Linear triangle wave
    Triangle,
    /// Abrupt square wave
    Square,
    /// Rising sawtooth
    Sawtooth,
}

impl Waveform {
    /// Sample the waveform at phase (0.0 to 1.0)
    /// Returns value in range -1.0 to 1.0
    pub fn sample(&self, phase: f32) -> f32 {
        match self {
            Waveform::Sine => (phase * TAU).sin(),

            Waveform::Triangle => {
                let p = phase * 4.0;
                if p < 1.0 {
                    p
                } else if p < 3.0 {
                    2.0 - p
                } else {
                    p - 4.0
                }
            }

            Waveform::Square => {
                if phase < 0.5 { 1.0 } else { -1.0 }
            }

            Waveform::Sawtooth => 2.0 * phase - 1.0,
        }
    }
}

/// Phase-continuous tone generator
#[derive(Clone, Debug)]
pub struct ToneGenerator {
    pub waveform: Waveform,
    /// Tone frequency in Hz
    pub frequency: f32,
    /// Peak amplitude (0.0 to 1.0)
    pub amplitude: f32,
    pub sample_rate: u32,
    phase: f64,
}

impl ToneGenerator {
    pub fn new(waveform: Waveform, frequency: f32, amplitude: f32, sample_rate: u32) -> Self {
        Self {
            waveform,
            frequency,
            amplitude,
            sample_rate,
            phase: 0.0,
        }
    }

    /// Fill `out` with the next samples of the tone
    pub fn fill(&mut self, out: &mut [f32]) {
        let step = self.frequency as f64 / self.sample_rate.max(1) as f64;
        for sample in out.iter_mut() {
            *sample = self.waveform.sample(self.phase as f32) * self.amplitude;
            self.phase = (self.phase + step).fract();
        }
    }
}

/// Feed `generator` into `writer` from a background thread
///
/// Writes one full slice per slice period until `running` is cleared, then
/// hands the writer back so the caller decides when the stream closes.
pub fn spawn_tone_producer(
    mut writer: StreamWriter,
    mut generator: ToneGenerator,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<StreamWriter>> {
    thread::Builder::new()
        .name("tone-producer".to_string())
        .spawn(move || {
            let slice_len = writer.stream().slice_len();
            let mut buf = vec![0.0; slice_len];
            let period =
                Duration::from_secs_f64(slice_len as f64 / generator.sample_rate.max(1) as f64);

            log::info!(
                "Tone producer started: {:?} at {} Hz, {} samples per slice",
                generator.waveform,
                generator.frequency,
                slice_len
            );

            let mut next = Instant::now();
            while running.load(Ordering::Relaxed) {
                generator.fill(&mut buf);
                writer.write(&buf);

                next += period;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else if now - next > period * 4 {
                    // Too far behind to catch up, resync instead of bursting
                    log::warn!("Tone producer fell behind by {:?}", now - next);
                    next = now;
                }
            }

            log::info!("Tone producer stopped after {} slices", writer.write_index());
            writer
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{SampleStream, StreamConfig};

    #[test]
    fn test_waveform_shapes() {
        assert!((Waveform::Sine.sample(0.25) - 1.0).abs() < 1e-6);
        assert!((Waveform::Triangle.sample(0.75) + 1.0).abs() < 1e-6);
        assert_eq!(Waveform::Square.sample(0.1), 1.0);
        assert_eq!(Waveform::Square.sample(0.6), -1.0);
        assert_eq!(Waveform::Sawtooth.sample(0.0), -1.0);
    }

    #[test]
    fn test_generator_is_phase_continuous() {
        // 4 samples per period
        let mut one_call = ToneGenerator::new(Waveform::Sine, 1.0, 0.5, 4);
        let mut whole = [0.0; 8];
        one_call.fill(&mut whole);

        let mut two_calls = ToneGenerator::new(Waveform::Sine, 1.0, 0.5, 4);
        let mut first = [0.0; 3];
        let mut second = [0.0; 5];
        two_calls.fill(&mut first);
        two_calls.fill(&mut second);

        assert_eq!(&whole[..3], &first);
        assert_eq!(&whole[3..], &second);
        assert!((whole[1] - 0.5).abs() < 1e-6);
        assert!((whole[3] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_tone_producer_writes_until_stopped() {
        let (writer, stream) = SampleStream::new(StreamConfig::new(64, 32)).unwrap();
        let running = Arc::new(AtomicBool::new(true));
        let generator = ToneGenerator::new(Waveform::Square, 100.0, 1.0, 8_000);

        let handle = spawn_tone_producer(writer, generator, Arc::clone(&running)).unwrap();
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::Relaxed);
        let writer = handle.join().unwrap();

        assert!(writer.write_index() > 0);
        assert!(!stream.is_closed());
        let slice = stream.read(0).unwrap();
        assert_eq!(slice.samples.len(), 32);
        assert!(slice.samples.iter().all(|s| s.abs() == 1.0));

        writer.close();
        assert!(stream.is_closed());
    }
}
