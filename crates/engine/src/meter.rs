//! Level meters fed from the hardware callback.
//!
//! Meters are installed from the control thread and handed to the callback
//! through an rtrb queue. The slot the callback lets go of is a
//! [`basedrop::Shared`], so the final drop runs on the control thread when it
//! collects garbage rather than inside the callback.

use std::sync::Arc;

use basedrop::{Handle, Shared};

use crate::lockfree::{AtomicFlag, AtomicFloat};

/// Receives blocks of interleaved samples for display.
///
/// `update` runs on the hardware callback thread and must not block.
pub trait Meter: Send + Sync {
    fn update(&self, interleaved: &[f32], channels: usize, frames: usize);

    /// Forget previous levels, e.g. when a stream stops.
    fn reset(&self, rate: u32);

    fn is_disabled(&self) -> bool {
        false
    }
}

/// Peak and RMS per channel of the most recent block.
pub struct LevelMeter {
    peaks: Vec<AtomicFloat>,
    rms: Vec<AtomicFloat>,
    clipped: AtomicFlag,
    disabled: AtomicFlag,
}

impl LevelMeter {
    pub fn new(channels: usize) -> Self {
        Self {
            peaks: (0..channels).map(|_| AtomicFloat::default()).collect(),
            rms: (0..channels).map(|_| AtomicFloat::default()).collect(),
            clipped: AtomicFlag::default(),
            disabled: AtomicFlag::default(),
        }
    }

    pub fn channels(&self) -> usize {
        self.peaks.len()
    }

    pub fn peak(&self, channel: usize) -> f32 {
        self.peaks.get(channel).map_or(0.0, AtomicFloat::get)
    }

    pub fn rms(&self, channel: usize) -> f32 {
        self.rms.get(channel).map_or(0.0, AtomicFloat::get)
    }

    /// Largest peak over all channels.
    pub fn max_peak(&self) -> f32 {
        self.peaks.iter().map(AtomicFloat::get).fold(0.0, f32::max)
    }

    pub fn clipped(&self) -> bool {
        self.clipped.get()
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.set(disabled);
    }
}

impl Meter for LevelMeter {
    fn update(&self, interleaved: &[f32], channels: usize, frames: usize) {
        if channels == 0 || frames == 0 {
            return;
        }
        for (ch, (peak_out, rms_out)) in self.peaks.iter().zip(&self.rms).enumerate().take(channels) {
            let mut peak = 0.0f32;
            let mut sum = 0.0f32;
            for frame in interleaved.chunks_exact(channels).take(frames) {
                let value = frame[ch];
                peak = peak.max(value.abs());
                sum += value * value;
            }
            if peak >= 1.0 {
                self.clipped.set(true);
            }
            peak_out.set(peak);
            rms_out.set((sum / frames as f32).sqrt());
        }
    }

    fn reset(&self, _rate: u32) {
        for level in self.peaks.iter().chain(&self.rms) {
            level.set(0.0);
        }
        self.clipped.set(false);
    }

    fn is_disabled(&self) -> bool {
        self.disabled.get()
    }
}

pub(crate) type MeterSlot = Shared<Option<Arc<dyn Meter>>>;

pub(crate) enum MeterUpdate {
    Capture(MeterSlot),
    Playback(MeterSlot),
}

pub(crate) fn meter_slot(handle: &Handle, meter: Option<Arc<dyn Meter>>) -> MeterSlot {
    Shared::new(handle, meter)
}

/// The callback's end of the meter handoff.
pub(crate) struct MeterPort {
    updates: rtrb::Consumer<MeterUpdate>,
    capture: MeterSlot,
    playback: MeterSlot,
}

impl MeterPort {
    pub(crate) fn new(
        updates: rtrb::Consumer<MeterUpdate>,
        capture: MeterSlot,
        playback: MeterSlot,
    ) -> Self {
        Self {
            updates,
            capture,
            playback,
        }
    }

    /// Swap in meters installed since the last callback.
    pub(crate) fn poll(&mut self) {
        while let Ok(update) = self.updates.pop() {
            match update {
                MeterUpdate::Capture(slot) => self.capture = slot,
                MeterUpdate::Playback(slot) => self.playback = slot,
            }
        }
    }

    pub(crate) fn capture(&self) -> Option<&dyn Meter> {
        self.capture.as_deref().filter(|meter| !meter.is_disabled())
    }

    pub(crate) fn playback(&self) -> Option<&dyn Meter> {
        self.playback.as_deref().filter(|meter| !meter.is_disabled())
    }
}
