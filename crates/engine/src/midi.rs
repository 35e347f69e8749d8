//! MIDI timing derived from the audio clock.
//!
//! MIDI scheduling itself lives outside the engine. This layer only turns the
//! published stream time into the two numbers a scheduler needs: the current
//! MIDI clock and the hardware timestamp for an event at a given track time.
//! Neither is warped by playback speed; only audio is.

use std::sync::Arc;

use crate::driver::SystemClock;
use crate::time::{MIDI_CLOCK_BIAS, SharedClock};

/// Read-only view of the stream clock for a MIDI output thread.
#[derive(Clone)]
pub struct MidiSync {
    clock: Arc<SharedClock>,
    system: SystemClock,
    /// Fixed latency of the MIDI output device, in seconds.
    output_latency: f64,
    /// Latency of the synth the MIDI output drives, in seconds.
    synth_latency: f64,
}

impl MidiSync {
    pub(crate) fn new(clock: Arc<SharedClock>, system: SystemClock) -> Self {
        Self {
            clock,
            system,
            output_latency: 0.0,
            synth_latency: 0.0,
        }
    }

    pub fn with_latencies(mut self, output_latency_ms: f64, synth_latency_ms: f64) -> Self {
        self.output_latency = output_latency_ms / 1000.0;
        self.synth_latency = synth_latency_ms / 1000.0;
        self
    }

    pub fn audio_time(&self) -> f64 {
        self.clock.audio_time()
    }

    pub fn pause_time(&self) -> f64 {
        self.clock.pause_time()
    }

    /// MIDI clock at `system_time` (seconds on the driver clock).
    pub fn midi_time_at(&self, system_time: f64) -> f64 {
        self.clock.midi_time(system_time)
    }

    pub fn midi_time(&self) -> f64 {
        self.midi_time_at(self.system.now())
    }

    /// Hardware timestamp at which an event at `track_time` must be sent.
    pub fn event_timestamp(&self, track_time: f64) -> f64 {
        track_time + self.pause_time() + MIDI_CLOCK_BIAS - (self.output_latency + self.synth_latency)
    }
}
