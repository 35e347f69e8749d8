use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use duplex_engine::StreamOptions;

/// Audio settings persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Audio host by name; `None` picks the platform default.
    pub host: Option<String>,
    pub playback_device: Option<String>,
    pub recording_device: Option<String>,
    pub sample_rate: u32,
    pub frames_per_buffer: Option<u32>,
    pub recording_channels: u16,
    /// Applied to recordings made while playing back.
    pub latency_correction_ms: f64,
    pub silence_level_db: f64,
    pub sound_activated_recording: bool,
    pub software_playthrough: bool,
    pub midi_output_latency_ms: f64,
    pub synth_latency_ms: f64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            host: None,
            playback_device: None,
            recording_device: None,
            sample_rate: 44100,
            frames_per_buffer: None,
            recording_channels: 2,
            latency_correction_ms: -130.0,
            silence_level_db: -50.0,
            sound_activated_recording: false,
            software_playthrough: false,
            midi_output_latency_ms: 0.0,
            synth_latency_ms: 5.0,
        }
    }
}

impl Preferences {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("duplex").join("audio.toml"))
    }

    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Missing or unreadable files yield the defaults.
    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = fs::read_to_string(path) else {
            return Self::default();
        };
        toml::from_str(&contents).unwrap_or_else(|e| {
            log::warn!("ignoring malformed preferences at {}: {e}", path.display());
            Self::default()
        })
    }

    pub fn save(&self) {
        let Some(path) = Self::config_path() else {
            return;
        };
        if let Err(e) = self.save_to(&path) {
            log::warn!("could not save preferences: {e:#}");
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Linear peak level below which sound-activated recording pauses.
    pub fn silence_level(&self) -> f32 {
        10f64.powf(self.silence_level_db / 20.0) as f32
    }

    /// Stream options for these settings. The sample rate is the requested
    /// one; negotiate it against the devices before opening a stream.
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            sample_rate: self.sample_rate,
            frames_per_buffer: self.frames_per_buffer,
            playback_device: self.playback_device.clone(),
            capture_device: self.recording_device.clone(),
            capture_channels: Some(self.recording_channels),
            latency_correction_ms: self.latency_correction_ms,
            playthrough: self.software_playthrough,
            silence_level: self.sound_activated_recording.then(|| self.silence_level()),
            ..Default::default()
        }
    }
}
