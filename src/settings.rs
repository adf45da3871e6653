use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::source::{ToneGenerator, Waveform};
use crate::stream::StreamConfig;

/// Returns the path to the settings file: `~/.config/scope-stream/settings.json`
pub fn settings_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push("scope-stream");
    path.push("settings.json");
    path
}

/// Persisted session settings.
///
/// Serialized as JSON to the platform config directory.
/// Fields use `#[serde(default)]` so that adding new settings
/// won't break existing config files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub stream: StreamSettings,
    pub audio: AudioSettings,
    pub tone: ToneSettings,
    /// How often the monitor reports, in milliseconds
    pub report_interval_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Number of slices retained
    pub capacity: usize,
    /// Samples per slice
    pub slice_len: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Input device name; `None` uses the host default
    pub input_device: Option<String>,
    /// Output device name; `None` uses the host default
    pub output_device: Option<String>,
    /// Sample rate for synthetic sources (devices report their own)
    pub sample_rate: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneSettings {
    pub waveform: Waveform,
    pub frequency: f32,
    pub amplitude: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stream: StreamSettings::default(),
            audio: AudioSettings::default(),
            tone: ToneSettings::default(),
            report_interval_ms: 1000,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        let config = StreamConfig::default();
        Self {
            capacity: config.capacity,
            slice_len: config.slice_len,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: 44_100,
        }
    }
}

impl Default for ToneSettings {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine,
            frequency: 440.0,
            amplitude: 0.5,
        }
    }
}

impl Settings {
    /// Load settings from the default location, falling back to defaults on any error.
    pub fn load() -> Self {
        Self::load_from(&settings_path())
    }

    /// Load settings from `path`, falling back to defaults on any error.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => {
                    log::info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    log::warn!("Failed to parse settings ({}), using defaults", e);
                    Self::default()
                }
            },
            Err(e) => {
                log::info!("No settings file found ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Save settings to the default location, logging any failure.
    pub fn save(&self) {
        let path = settings_path();
        if let Err(e) = self.save_to(&path) {
            log::warn!("Failed to write settings to {}: {}", path.display(), e);
        }
    }

    /// Save settings to `path` as pretty JSON.
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        log::info!("Saved settings to {}", path.display());
        Ok(())
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig::new(self.stream.capacity, self.stream.slice_len)
    }

    pub fn tone_generator(&self) -> ToneGenerator {
        ToneGenerator::new(
            self.tone.waveform,
            self.tone.frequency,
            self.tone.amplitude,
            self.audio.sample_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.stream.capacity = 32;
        settings.tone.waveform = Waveform::Triangle;
        settings.audio.output_device = Some("Speakers".to_string());
        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{ "stream": { "slice_len": 256 } }"#).unwrap();

        let settings = Settings::load_from(&path);
        assert_eq!(settings.stream.slice_len, 256);
        assert_eq!(settings.stream.capacity, StreamConfig::default().capacity);
        assert_eq!(settings.report_interval_ms, 1000);
    }

    #[test]
    fn test_unreadable_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        assert_eq!(Settings::load_from(&path), Settings::default());

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }
}
