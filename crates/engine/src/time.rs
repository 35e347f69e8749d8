//! The stream time model.
//!
//! [`StreamClock`] is owned by the hardware callback and is the only writer
//! of stream time. After every callback it publishes its scalars into a
//! [`SharedClock`], which the control thread (cursor display) and the MIDI
//! layer read without locking. Readers may see values one callback old.

use crate::driver::CallbackInfo;
use crate::lockfree::AtomicDouble;
use crate::options::{PlayMode, SyncMode};

/// Per-callback decay of the sync line, in seconds per second of audio.
///
/// Lets the estimate follow a sound card whose sample clock runs slightly
/// slower than the system clock.
pub const SYNC_DECAY_RATE: f64 = 0.0002;

/// Callbacks after start during which the latency estimate is still learned.
pub const LATENCY_LEARNING_CALLBACKS: u32 = 20;

/// Offset added to the MIDI clock so it never goes negative near start.
pub const MIDI_CLOCK_BIAS: f64 = 1.0;

/// Lock-free snapshot of the stream clock.
#[derive(Debug, Default)]
pub struct SharedClock {
    t0: AtomicDouble,
    track_time: AtomicDouble,
    audio_time: AtomicDouble,
    pause_time: AtomicDouble,
    sync_offset: AtomicDouble,
    latency: AtomicDouble,
    last_callback_time: AtomicDouble,
}

impl SharedClock {
    pub fn t0(&self) -> f64 {
        self.t0.get()
    }

    /// Current position in track time, warped by speed and direction.
    pub fn track_time(&self) -> f64 {
        self.track_time.get()
    }

    /// `t0` plus every frame handed to the device, silence included.
    pub fn audio_time(&self) -> f64 {
        self.audio_time.get()
    }

    pub fn pause_time(&self) -> f64 {
        self.pause_time.get()
    }

    /// Audio time minus system time at the write point of the last callback.
    pub fn sync_offset(&self) -> f64 {
        self.sync_offset.get()
    }

    /// Estimated output path latency in seconds.
    pub fn latency(&self) -> f64 {
        self.latency.get()
    }

    pub fn last_callback_time(&self) -> f64 {
        self.last_callback_time.get()
    }

    /// Audio time audible at `system_time`, plus [`MIDI_CLOCK_BIAS`].
    ///
    /// Pauses are not subtracted here: this clock keeps running through
    /// silence, and [`crate::MidiSync::event_timestamp`] adds the pause time to
    /// each event instead, which comes to the same schedule.
    pub fn midi_time(&self, system_time: f64) -> f64 {
        system_time + self.sync_offset() - self.latency() + MIDI_CLOCK_BIAS
    }

    pub(crate) fn reset(&self, t0: f64) {
        self.t0.set(t0);
        self.track_time.set(t0);
        self.audio_time.set(t0);
        self.pause_time.set(0.0);
        self.sync_offset.set(0.0);
        self.latency.set(0.0);
        self.last_callback_time.set(0.0);
    }
}

/// The "full buffer" line relating audio time to system time.
///
/// Each callback yields an observation `audio_time - system_time` at the
/// moment the callback writes. The line is never allowed below an
/// observation and otherwise sinks by [`SYNC_DECAY_RATE`].
#[derive(Debug, Clone, Default)]
pub struct SyncLine {
    offset: f64,
    start_offset: f64,
    latency: f64,
    updates: u32,
}

impl SyncLine {
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn latency(&self) -> f64 {
        self.latency
    }

    /// Feed one observation covering a callback of `frames` frames.
    pub fn observe(&mut self, observation: f64, frames: usize, rate: f64) {
        if self.updates == 0 {
            self.offset = observation;
            self.start_offset = observation;
        } else {
            self.offset -= frames as f64 * SYNC_DECAY_RATE / rate;
            if observation > self.offset {
                self.offset = observation;
            }
        }
        self.updates = self.updates.saturating_add(1);

        // The first buffer starts empty, so how far the line climbs over the
        // first callbacks is the amount the device buffers.
        if self.updates <= LATENCY_LEARNING_CALLBACKS {
            self.latency = (self.offset - self.start_offset).max(0.0);
        }
    }

    /// Trust a DAC timestamp reported by the driver instead of estimating.
    pub fn report(&mut self, audio_time: f64, dac_time: f64) {
        self.offset = audio_time - dac_time;
        self.latency = 0.0;
        self.updates = self.updates.saturating_add(1);
    }
}

/// Stream time owned by the hardware callback.
pub struct StreamClock {
    shared: std::sync::Arc<SharedClock>,
    rate: f64,
    t0: f64,
    t1: f64,
    mode: PlayMode,
    sync_mode: SyncMode,
    track_time: f64,
    /// Real seconds played since the last loop restart or seek.
    warped_time: f64,
    frames_written: u64,
    pause_frames: u64,
    line: SyncLine,
}

impl StreamClock {
    pub fn new(
        shared: std::sync::Arc<SharedClock>,
        rate: u32,
        t0: f64,
        t1: f64,
        mode: PlayMode,
        sync_mode: SyncMode,
    ) -> Self {
        shared.reset(t0);
        Self {
            shared,
            rate: rate as f64,
            t0,
            t1,
            mode,
            sync_mode,
            track_time: t0,
            warped_time: 0.0,
            frames_written: 0,
            pause_frames: 0,
            line: SyncLine::default(),
        }
    }

    pub fn track_time(&self) -> f64 {
        self.track_time
    }

    pub fn warped_time(&self) -> f64 {
        self.warped_time
    }

    pub fn reversed(&self) -> bool {
        self.t1 < self.t0
    }

    pub fn audio_time(&self) -> f64 {
        self.t0 + self.frames_written as f64 / self.rate
    }

    pub fn pause_time(&self) -> f64 {
        self.pause_frames as f64 / self.rate
    }

    pub fn line(&self) -> &SyncLine {
        &self.line
    }

    /// Update the sync line from this callback's timing. Runs on every
    /// callback, paused or not, before the buffer is accounted.
    pub fn observe(&mut self, info: &CallbackInfo, frames: usize) {
        let audio_time = self.audio_time();
        match (self.sync_mode, info.output_dac_time) {
            (SyncMode::Reported, Some(dac_time)) => self.line.report(audio_time, dac_time),
            _ => self
                .line
                .observe(audio_time - info.system_time, frames, self.rate),
        }
        self.shared.sync_offset.set(self.line.offset());
        self.shared.latency.set(self.line.latency());
        self.shared.last_callback_time.set(info.system_time);
    }

    /// Account a buffer of silence emitted while paused or priming. The MIDI
    /// clock keeps running; track time stays put.
    pub fn add_pause(&mut self, frames: usize) {
        self.pause_frames += frames as u64;
        self.frames_written += frames as u64;
        self.publish();
    }

    /// Advance by one buffer of `frames` played at `speed`.
    pub fn advance(&mut self, frames: usize, speed: f64) {
        let real = frames as f64 / self.rate;
        let delta = if self.reversed() { -real * speed } else { real * speed };
        self.track_time += delta;
        self.warped_time += real;
        self.frames_written += frames as u64;
        if self.mode == PlayMode::Looped {
            self.wrap();
        }
        self.publish();
    }

    /// Bring a looped track time back inside the selection.
    ///
    /// The overshoot is folded in one step, so the cost does not depend on how
    /// short the loop is. A loop too short to represent at this track time, or
    /// with no length at all, pins time to `t0`.
    pub fn wrap(&mut self) {
        let length = (self.t1 - self.t0).abs();
        if !self.track_time.is_finite() || length <= 0.0 {
            self.track_time = self.t0;
            self.warped_time = 0.0;
            return;
        }
        if self.reversed() {
            if self.track_time <= self.t1 {
                self.track_time = self.t0 - (self.t0 - self.track_time).rem_euclid(length);
                self.warped_time = 0.0;
                if self.track_time <= self.t1 || self.track_time > self.t0 {
                    self.track_time = self.t0;
                }
            }
        } else if self.track_time >= self.t1 {
            self.track_time = self.t0 + (self.track_time - self.t0).rem_euclid(length);
            self.warped_time = 0.0;
            if self.track_time >= self.t1 || self.track_time < self.t0 {
                self.track_time = self.t0;
            }
        }
    }

    /// True once straight playback has reached `t1` in its direction.
    pub fn reached_end(&self) -> bool {
        if self.reversed() {
            self.track_time <= self.t1
        } else {
            self.track_time >= self.t1
        }
    }

    /// Jump to `time` after a seek, clamped to the selection.
    pub fn seek(&mut self, time: f64) {
        let (low, high) = if self.reversed() {
            (self.t1, self.t0)
        } else {
            (self.t0, self.t1)
        };
        self.track_time = time.clamp(low, high);
        self.warped_time = 0.0;
        if self.mode == PlayMode::Looped {
            self.wrap();
        }
        self.publish();
    }

    fn publish(&self) {
        self.shared.track_time.set(self.track_time);
        self.shared.audio_time.set(self.audio_time());
        self.shared.pause_time.set(self.pause_time());
    }
}
