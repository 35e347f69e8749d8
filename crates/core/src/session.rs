use duplex_engine::{
    AudioDriver, AudioIo, CaptureTrack, CpalDriver, MidiSync, PauseRequest, PlayMode, PlaybackTrack, StopReport,
    StreamOptions, StreamToken,
};

use crate::preferences::Preferences;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Recording,
    Paused,
    /// Input is metered but nothing plays or records.
    Monitoring,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Recording)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            PlaybackState::Playing | PlaybackState::Recording | PlaybackState::Paused
        )
    }
}

/// Drives one [`AudioIo`] from a control loop, with settings taken from
/// [`Preferences`].
pub struct Session {
    io: AudioIo,
    preferences: Preferences,
    playback_state: PlaybackState,
    /// State to return to on resume.
    running_state: PlaybackState,
    token: Option<StreamToken>,
}

impl Session {
    /// Opens the host named in the preferences, or the default one.
    pub fn new(preferences: Preferences) -> anyhow::Result<Self> {
        let driver = CpalDriver::new(preferences.host.as_deref())?;
        Self::with_driver(Box::new(driver), preferences)
    }

    pub fn with_driver(driver: Box<dyn AudioDriver>, preferences: Preferences) -> anyhow::Result<Self> {
        Ok(Self {
            io: AudioIo::new(driver)?,
            preferences,
            playback_state: PlaybackState::Stopped,
            running_state: PlaybackState::Stopped,
            token: None,
        })
    }

    /// Stream options with the preferred rate negotiated against the devices.
    pub fn stream_options(&mut self) -> anyhow::Result<StreamOptions> {
        let mut options = self.preferences.stream_options();
        options.sample_rate = self.io.best_rate(
            options.playback_device.as_deref(),
            options.capture_device.as_deref(),
            options.sample_rate,
        )?;
        Ok(options)
    }

    pub fn play(&mut self, tracks: Vec<PlaybackTrack>, t0: f64, t1: f64, mode: PlayMode) -> anyhow::Result<StreamToken> {
        let mut options = self.stream_options()?;
        options.mode = mode;
        options.capture_channels = Some(0);
        self.start(tracks, Vec::new(), t0, t1, &options, PlaybackState::Playing)
    }

    /// Records into `capture` while playing `playback` over `t0..t1`.
    pub fn record(
        &mut self,
        playback: Vec<PlaybackTrack>,
        capture: Vec<CaptureTrack>,
        t0: f64,
        t1: f64,
    ) -> anyhow::Result<StreamToken> {
        let options = self.stream_options()?;
        self.start(playback, capture, t0, t1, &options, PlaybackState::Recording)
    }

    fn start(
        &mut self,
        playback: Vec<PlaybackTrack>,
        capture: Vec<CaptureTrack>,
        t0: f64,
        t1: f64,
        options: &StreamOptions,
        state: PlaybackState,
    ) -> anyhow::Result<StreamToken> {
        let token = self.io.start_stream(playback, capture, t0, t1, options)?;
        self.token = Some(token);
        self.playback_state = state;
        self.running_state = state;
        Ok(token)
    }

    pub fn monitor(&mut self) -> anyhow::Result<()> {
        if self.playback_state.is_streaming() {
            anyhow::bail!("cannot monitor while a stream is running");
        }
        let options = self.stream_options()?;
        self.io.start_monitoring(&options)?;
        self.playback_state = PlaybackState::Monitoring;
        Ok(())
    }

    /// Stops whatever is running, monitoring included. Returns the report
    /// when a stream ran.
    pub fn stop(&mut self) -> Option<StopReport> {
        let report = self.io.stop_stream();
        self.token = None;
        self.playback_state = PlaybackState::Stopped;
        self.running_state = PlaybackState::Stopped;
        if let Some(report) = &report {
            for warning in &report.warnings {
                log::warn!("{warning}");
            }
        }
        report
    }

    pub fn pause(&mut self) {
        if !self.playback_state.is_playing() {
            return;
        }
        self.io.set_paused(true);
        self.playback_state = PlaybackState::Paused;
    }

    pub fn resume(&mut self) {
        if self.playback_state != PlaybackState::Paused {
            return;
        }
        self.io.set_paused(false);
        self.playback_state = self.running_state;
    }

    pub fn toggle_pause(&mut self) {
        match self.playback_state {
            PlaybackState::Paused => self.resume(),
            _ => self.pause(),
        }
    }

    pub fn seek(&mut self, time: f64) -> bool {
        self.io.seek(time)
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.io.set_speed(speed);
    }

    /// Call regularly from the control loop. Applies sound-activated pause
    /// requests and stops the stream when it finished or failed to record,
    /// returning the report in that case.
    pub fn poll(&mut self) -> Option<StopReport> {
        self.io.collect_garbage();
        if !self.playback_state.is_streaming() {
            return None;
        }

        match self.io.take_pause_request() {
            Some(PauseRequest::Pause) => self.pause(),
            Some(PauseRequest::Resume) => self.resume(),
            None => {}
        }

        if self.io.recording_error() {
            log::error!("recording failed; stopping the stream");
            return self.stop();
        }
        if self.io.stream_completed() {
            return self.stop();
        }
        None
    }

    pub fn stream_time(&self) -> Option<f64> {
        self.io.stream_time()
    }

    pub fn token(&self) -> Option<StreamToken> {
        self.token
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback_state
    }

    pub fn is_playing(&self) -> bool {
        self.playback_state.is_playing()
    }

    /// MIDI timing with the latencies from the preferences.
    pub fn midi_sync(&self) -> MidiSync {
        self.io
            .midi_sync()
            .with_latencies(self.preferences.midi_output_latency_ms, self.preferences.synth_latency_ms)
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// New preferences apply to the next stream; the host stays the one the
    /// session was opened with.
    pub fn set_preferences(&mut self, preferences: Preferences) {
        self.preferences = preferences;
        self.io.invalidate_devices();
    }

    pub fn io(&self) -> &AudioIo {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut AudioIo {
        &mut self.io
    }
}
