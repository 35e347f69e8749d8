use std::sync::Arc;

use duplex_transport::{Mixer, TrackStorage};

use crate::lockfree::{AtomicFlag, AtomicFloat};

/// How track time moves through the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayMode {
    /// Play `t0..t1` once and report completion at `t1`.
    #[default]
    Straight,
    /// Repeat `t0..t1` until stopped.
    Looped,
    /// Scrubbing: no end detection, speed may change while streaming.
    Interactive,
}

/// Where the sync line gets its output timestamps from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Estimate the DAC time from callback arrival times.
    #[default]
    Estimate,
    /// Use the driver's reported DAC time when it has one.
    Reported,
}

/// Ring sizes and transfer thresholds, in seconds of audio.
///
/// Larger sessions get larger rings so the disk thread wakes less often per
/// track. Any field can be forced through [`RingSizing::with_overrides`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RingSizing {
    pub playback_secs: f64,
    pub capture_secs: f64,
    /// Largest block the disk thread mixes in one go.
    pub max_playback_secs_to_copy: f64,
    /// Smallest block the disk thread drains from the capture rings.
    pub min_capture_secs_to_copy: f64,
}

impl RingSizing {
    pub fn for_tracks(playback_tracks: usize, capture_tracks: usize) -> Self {
        Self {
            playback_secs: 4.5 + 0.5 * playback_tracks.min(16) as f64,
            capture_secs: 4.5 + 0.5 * capture_tracks as f64,
            max_playback_secs_to_copy: 0.75 + 0.25 * playback_tracks as f64,
            min_capture_secs_to_copy: 0.2 + 0.2 * capture_tracks as f64,
        }
    }

    pub fn with_overrides(mut self, overrides: &SizingOverrides) -> Self {
        if let Some(secs) = overrides.playback_secs {
            self.playback_secs = secs;
        }
        if let Some(secs) = overrides.capture_secs {
            self.capture_secs = secs;
        }
        if let Some(secs) = overrides.max_playback_secs_to_copy {
            self.max_playback_secs_to_copy = secs;
        }
        if let Some(secs) = overrides.min_capture_secs_to_copy {
            self.min_capture_secs_to_copy = secs;
        }
        self
    }

    pub(crate) fn halved(self) -> Self {
        Self {
            playback_secs: self.playback_secs / 2.0,
            capture_secs: self.capture_secs / 2.0,
            max_playback_secs_to_copy: self.max_playback_secs_to_copy / 2.0,
            min_capture_secs_to_copy: self.min_capture_secs_to_copy / 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SizingOverrides {
    pub playback_secs: Option<f64>,
    pub capture_secs: Option<f64>,
    pub max_playback_secs_to_copy: Option<f64>,
    pub min_capture_secs_to_copy: Option<f64>,
}

/// Everything [`crate::AudioIo::start_stream`] needs besides the tracks.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub sample_rate: u32,
    pub frames_per_buffer: Option<u32>,
    pub playback_device: Option<String>,
    pub capture_device: Option<String>,
    pub playback_channels: u16,
    /// Input channels to open; defaults to one per capture track.
    pub capture_channels: Option<u16>,
    pub mode: PlayMode,
    pub speed: f64,
    pub sync_mode: SyncMode,
    pub sizing: SizingOverrides,
    /// Shift applied to recorded tracks when playback ran alongside.
    pub latency_correction_ms: f64,
    pub playthrough: bool,
    /// Linear input peak below which sound-activated recording pauses.
    pub silence_level: Option<f32>,
    pub emulate_output_volume: bool,
    pub output_volume: f32,
    /// Feed the playback meter before the output volume is applied.
    pub meter_pre_volume: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            frames_per_buffer: None,
            playback_device: None,
            capture_device: None,
            playback_channels: 2,
            capture_channels: None,
            mode: PlayMode::Straight,
            speed: 1.0,
            sync_mode: SyncMode::Estimate,
            sizing: SizingOverrides::default(),
            latency_correction_ms: -130.0,
            playthrough: false,
            silence_level: None,
            emulate_output_volume: false,
            output_volume: 1.0,
            meter_pre_volume: false,
        }
    }
}

/// Live per-track mix controls, shared with the hardware callback.
#[derive(Debug)]
pub struct TrackControls {
    pub mute: AtomicFlag,
    pub solo: AtomicFlag,
    /// Realtime effects only run on selected tracks.
    pub selected: AtomicFlag,
    pub gain: AtomicFloat,
    /// -1.0 (left) to 1.0 (right).
    pub pan: AtomicFloat,
}

impl Default for TrackControls {
    fn default() -> Self {
        Self {
            mute: AtomicFlag::new(false),
            solo: AtomicFlag::new(false),
            selected: AtomicFlag::new(true),
            gain: AtomicFloat::new(1.0),
            pan: AtomicFloat::new(0.0),
        }
    }
}

impl TrackControls {
    /// Gain for output `channel` under the linear pan law.
    pub fn channel_gain(&self, channel: usize) -> f32 {
        let gain = self.gain.get();
        let pan = self.pan.get().clamp(-1.0, 1.0);
        match channel {
            0 if pan > 0.0 => gain * (1.0 - pan),
            1 if pan < 0.0 => gain * (1.0 + pan),
            _ => gain,
        }
    }
}

/// A track to play: its mixer plus the controls the caller keeps.
pub struct PlaybackTrack {
    pub mixer: Box<dyn Mixer>,
    pub controls: Arc<TrackControls>,
}

impl PlaybackTrack {
    pub fn new(mixer: impl Mixer + 'static) -> Self {
        Self {
            mixer: Box::new(mixer),
            controls: Arc::default(),
        }
    }

    pub fn with_controls(mut self, controls: Arc<TrackControls>) -> Self {
        self.controls = controls;
        self
    }
}

/// A track to record into. Capture track `i` takes input channel `i`.
pub type CaptureTrack = Box<dyn TrackStorage>;
