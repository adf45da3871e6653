//! scope-stream - capture or synthesise audio into a shared sample stream
//!
//! One producer (an input device or a test tone) feeds the stream. A level
//! monitor reads it on the main thread, and optionally an output device
//! plays it back, each through its own read cursor.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};

use scope_stream::audio::{AudioEvent, AudioSession, CallReport};
use scope_stream::monitor::Monitor;
use scope_stream::playhead::Playhead;
use scope_stream::settings::{settings_path, Settings};
use scope_stream::source::{spawn_tone_producer, Waveform};
use scope_stream::stream::SampleStream;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    /// Capture from an input device
    Input,
    /// Generate a test tone
    Tone,
}

#[derive(Parser, Debug)]
#[command(name = "scope-stream")]
#[command(about = "Feed audio into a multi-reader sample stream and monitor it")]
#[command(version)]
struct Args {
    /// Where samples come from
    #[arg(long, value_enum, default_value_t = SourceKind::Tone)]
    source: SourceKind,

    /// Play the stream back through the output device
    #[arg(long)]
    playback: bool,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,

    /// Number of slices the stream retains
    #[arg(long)]
    capacity: Option<usize>,

    /// Samples per slice
    #[arg(long)]
    slice_len: Option<usize>,

    /// Sample rate of the test tone
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Test tone frequency in Hz
    #[arg(long)]
    frequency: Option<f32>,

    /// Test tone waveform
    #[arg(long, value_enum)]
    waveform: Option<Waveform>,

    /// Input device name
    #[arg(long)]
    input_device: Option<String>,

    /// Output device name
    #[arg(long)]
    output_device: Option<String>,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the effective settings back to the settings file
    #[arg(long)]
    save_settings: bool,
}

impl Args {
    /// Command line flags take precedence over the settings file
    fn apply(&self, settings: &mut Settings) {
        if let Some(capacity) = self.capacity {
            settings.stream.capacity = capacity;
        }
        if let Some(slice_len) = self.slice_len {
            settings.stream.slice_len = slice_len;
        }
        if let Some(sample_rate) = self.sample_rate {
            settings.audio.sample_rate = sample_rate;
        }
        if let Some(frequency) = self.frequency {
            settings.tone.frequency = frequency;
        }
        if let Some(waveform) = self.waveform {
            settings.tone.waveform = waveform;
        }
        if self.input_device.is_some() {
            settings.audio.input_device = self.input_device.clone();
        }
        if self.output_device.is_some() {
            settings.audio.output_device = self.output_device.clone();
        }
    }
}

fn log_call_report(name: &str, report: Option<CallReport>) {
    if let Some(r) = report {
        log::debug!(
            "{} callback: {} calls, mean {:?} ({:.1} Hz), min {:?}, max {:?}",
            name,
            r.calls,
            r.mean,
            r.frequency(),
            r.min,
            r.max
        );
    }
}

fn main() -> Result<()> {
    env_logger::init();
    log::info!("Starting scope-stream");

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = Settings::load_from(&config_path);
    args.apply(&mut settings);

    if args.save_settings {
        settings
            .save_to(&config_path)
            .with_context(|| format!("failed to save settings to {}", config_path.display()))?;
    }

    let (writer, stream) =
        SampleStream::new(settings.stream_config()).context("invalid stream settings")?;
    let running = Arc::new(AtomicBool::new(true));
    let mut session = AudioSession::new();

    let (sample_rate, producer) = match args.source {
        SourceKind::Input => {
            let rate = session
                .start_capture(writer, &settings.audio)
                .context("failed to start capture")?;
            (rate, None)
        }
        SourceKind::Tone => {
            let generator = settings.tone_generator();
            let rate = generator.sample_rate;
            let handle = spawn_tone_producer(writer, generator, Arc::clone(&running))
                .context("failed to spawn tone producer")?;
            (rate, Some(handle))
        }
    };

    if args.playback {
        let playhead = Playhead::new(&stream, "playback");
        let output_rate = session
            .start_playback(playhead, &settings.audio)
            .context("failed to start playback")?;
        if output_rate != sample_rate {
            log::warn!(
                "Output runs at {} Hz but the source produces {} Hz; playback pitch will be off",
                output_rate,
                sample_rate
            );
        }
    }

    let mut monitor = Monitor::new(&stream, sample_rate);
    let interval = Duration::from_millis(settings.report_interval_ms.max(10));
    let deadline = Instant::now() + Duration::from_secs_f64(args.seconds.max(0.0));

    while Instant::now() < deadline {
        thread::sleep(interval);

        let report = monitor.poll();
        log::info!(
            "{} slices ({} samples), peak {:.3}, rms {:.3}, lag {:?}",
            report.slices,
            report.samples,
            report.peak,
            report.rms,
            report.lag
        );
        if report.skipped > 0 {
            log::warn!("Monitor fell behind and skipped {} slices", report.skipped);
        }

        session.drain_events(|event| match event {
            AudioEvent::Underrun { missing } => {
                log::warn!("Playback underrun: {} samples of silence", missing)
            }
            AudioEvent::FellBehind { skipped } => {
                log::warn!("Playback fell behind the stream window, skipped {} slices", skipped)
            }
        });
        log_call_report("Input", session.input_stats().take_report());
        log_call_report("Output", session.output_stats().take_report());
    }

    running.store(false, Ordering::Relaxed);
    if let Some(handle) = producer {
        let writer = handle
            .join()
            .map_err(|_| anyhow!("tone producer panicked"))?;
        writer.close();
    }
    if session.dropped_events() > 0 {
        log::warn!("{} audio events were dropped", session.dropped_events());
    }
    session.stop();

    log::info!(
        "Done: {} slices, {} samples written, {} truncated writes",
        stream.write_index(),
        stream.samples_written(),
        stream.truncated_writes()
    );
    Ok(())
}
