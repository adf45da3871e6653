//! Audio session - connects cpal devices to a sample stream
//!
//! The input callback is the stream's producer; the output callback plays
//! the stream back through a [`Playhead`]. Neither callback locks, logs or
//! allocates.
//!
//! `cpal::Stream` is `!Send` on several platforms, so an `AudioSession`
//! has to be created and dropped on the same thread.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use thiserror::Error;

use super::events::{event_queue, AudioEvent, EventReceiver, EventSender, EVENT_QUEUE_CAPACITY};
use super::timing::CallStats;
use crate::playhead::Playhead;
use crate::settings::AudioSettings;
use crate::stream::StreamWriter;

/// Frames handed to the playhead per pass; larger device buffers are
/// processed in several passes
const PLAYBACK_CHUNK_FRAMES: usize = 4096;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no {0} device found")]
    NoDevice(&'static str),

    #[error("failed to query stream config: {0}")]
    Config(#[from] cpal::DefaultStreamConfigError),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to build stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("failed to start stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

impl Direction {
    fn name(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// Live capture and playback streams
pub struct AudioSession {
    /// Kept alive to keep the callbacks running
    streams: Vec<cpal::Stream>,
    events: Vec<EventReceiver>,
    input_stats: Arc<CallStats>,
    output_stats: Arc<CallStats>,
}

impl AudioSession {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            events: Vec::new(),
            input_stats: Arc::new(CallStats::new()),
            output_stats: Arc::new(CallStats::new()),
        }
    }

    /// Capture from the configured input device into `writer`
    ///
    /// The callback downmixes to mono and writes one slice per
    /// `slice_len` frames. Returns the device sample rate. The stream
    /// closes when the session stops.
    pub fn start_capture(
        &mut self,
        writer: StreamWriter,
        settings: &AudioSettings,
    ) -> Result<u32, AudioError> {
        let device = find_device(settings.input_device.as_deref(), Direction::Input)?;
        let supported = device.default_input_config()?;
        let sample_rate = supported.sample_rate().0;
        let config = supported.config();

        log::info!(
            "Capture config: {} Hz, {} channels, {:?}",
            sample_rate,
            config.channels,
            supported.sample_format()
        );

        let stats = Arc::clone(&self.input_stats);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_capture::<f32>(&device, &config, writer, stats)?,
            cpal::SampleFormat::I16 => build_capture::<i16>(&device, &config, writer, stats)?,
            cpal::SampleFormat::U16 => build_capture::<u16>(&device, &config, writer, stats)?,
            format => return Err(AudioError::UnsupportedFormat(format!("{:?}", format))),
        };

        stream.play()?;
        self.streams.push(stream);
        log::info!("Capture started");
        Ok(sample_rate)
    }

    /// Play the stream back through the configured output device
    ///
    /// Every output channel carries the same mono signal. Returns the
    /// device sample rate; no resampling is done.
    pub fn start_playback(
        &mut self,
        playhead: Playhead,
        settings: &AudioSettings,
    ) -> Result<u32, AudioError> {
        let device = find_device(settings.output_device.as_deref(), Direction::Output)?;
        let supported = device.default_output_config()?;
        let sample_rate = supported.sample_rate().0;
        let config = supported.config();

        log::info!(
            "Playback config: {} Hz, {} channels, {:?}",
            sample_rate,
            config.channels,
            supported.sample_format()
        );

        let (events, receiver) = event_queue(EVENT_QUEUE_CAPACITY);
        let stats = Arc::clone(&self.output_stats);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => {
                build_playback::<f32>(&device, &config, playhead, events, stats)?
            }
            cpal::SampleFormat::I16 => {
                build_playback::<i16>(&device, &config, playhead, events, stats)?
            }
            cpal::SampleFormat::U16 => {
                build_playback::<u16>(&device, &config, playhead, events, stats)?
            }
            format => return Err(AudioError::UnsupportedFormat(format!("{:?}", format))),
        };

        stream.play()?;
        self.streams.push(stream);
        self.events.push(receiver);
        log::info!("Playback started");
        Ok(sample_rate)
    }

    /// Hand every event queued by the callbacks to `f`
    pub fn drain_events(&mut self, mut f: impl FnMut(AudioEvent)) -> usize {
        self.events.iter_mut().map(|rx| rx.drain(&mut f)).sum()
    }

    /// Events lost because a callback's queue was full
    pub fn dropped_events(&self) -> u64 {
        self.events.iter().map(|rx| rx.dropped()).sum()
    }

    pub fn input_stats(&self) -> &CallStats {
        &self.input_stats
    }

    pub fn output_stats(&self) -> &CallStats {
        &self.output_stats
    }

    pub fn is_running(&self) -> bool {
        !self.streams.is_empty()
    }

    /// Stop all streams. Dropping the capture stream closes its writer.
    pub fn stop(&mut self) {
        if self.streams.is_empty() {
            return;
        }
        self.streams.clear();
        self.events.clear();
        log::info!("Audio stopped");
    }
}

impl Default for AudioSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick the device called `preferred`, else the host default
fn find_device(preferred: Option<&str>, direction: Direction) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    if let Some(name) = preferred {
        let devices: Result<Vec<cpal::Device>, _> = match direction {
            Direction::Input => host.input_devices().map(|d| d.collect()),
            Direction::Output => host.output_devices().map(|d| d.collect()),
        };
        match devices {
            Ok(devices) => {
                if let Some(device) = devices
                    .into_iter()
                    .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                {
                    log::info!("Using {} device: {}", direction.name(), name);
                    return Ok(device);
                }
                log::warn!(
                    "{} device '{}' not found, falling back to default",
                    direction.name(),
                    name
                );
            }
            Err(e) => log::warn!("Failed to list {} devices: {}", direction.name(), e),
        }
    }

    let device = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    }
    .ok_or(AudioError::NoDevice(direction.name()))?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using {} device: {}", direction.name(), device_name);
    Ok(device)
}

/// Downmix one interleaved frame to mono
fn downmix<T>(frame: &[T]) -> f32
where
    T: Sample,
    f32: FromSample<T>,
{
    let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
    sum / frame.len().max(1) as f32
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut writer: StreamWriter,
    stats: Arc<CallStats>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let slice_len = writer.stream().slice_len();

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            stats.record();
            for block in data.chunks(channels * slice_len) {
                writer.write_iter(block.chunks(channels).map(downmix::<T>));
            }
        },
        |err| log::error!("Capture stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

/// Fill an interleaved output buffer from the playhead
fn write_playback<T>(
    data: &mut [T],
    channels: usize,
    mono: &mut [f32],
    playhead: &mut Playhead,
    events: &mut EventSender,
) where
    T: Sample + FromSample<f32>,
{
    for frames in data.chunks_mut(channels * mono.len()) {
        let count = frames.len() / channels;
        let report = playhead.fill(&mut mono[..count]);

        if report.skipped > 0 {
            events.send(AudioEvent::FellBehind {
                skipped: report.skipped,
            });
        }
        if report.silence > 0 {
            events.send(AudioEvent::Underrun {
                missing: report.silence,
            });
        }

        for (frame, &sample) in frames.chunks_mut(channels).zip(mono.iter()) {
            for out in frame.iter_mut() {
                *out = T::from_sample(sample);
            }
        }
    }
}

fn build_playback<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut playhead: Playhead,
    mut events: EventSender,
    stats: Arc<CallStats>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut mono = vec![0.0f32; PLAYBACK_CHUNK_FRAMES];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            stats.record();
            write_playback(data, channels, &mut mono, &mut playhead, &mut events);
        },
        |err| log::error!("Playback stream error: {}", err),
        None,
    )?;
    Ok(stream)
}
