//! The hardware callback: moves samples between the rings and the device.
//!
//! Runs on the driver's thread. Steady state never locks, never allocates and
//! never logs; the only waits are inside a seek, which parks this one callback
//! while the disk thread refills the playback rings.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use duplex_transport::RealtimeEffects;

use crate::disk::DiskControl;
use crate::driver::{AudioCallback, CallbackInfo, CallbackResult, StatusFlags};
use crate::dropout::{Dropout, DropoutKind, DropoutRecorder};
use crate::meter::MeterPort;
use crate::options::{PlayMode, TrackControls};
use crate::ring::{RingConsumer, RingProducer};
use crate::state::{PauseRequest, StreamState};
use crate::time::StreamClock;

const SEEK_POLL: Duration = Duration::from_millis(1);

/// Frames of scratch space reserved up front when the driver gives no hint.
const DEFAULT_SCRATCH_FRAMES: usize = 4096;

/// The callback's end of one playback track.
pub(crate) struct PlaybackLane {
    pub rings: Vec<RingConsumer>,
    pub controls: Arc<TrackControls>,
    /// Realtime effect group of this track.
    pub group: usize,
}

/// Everything a stream's callback is built from.
pub(crate) struct CallbackSetup {
    pub token: i64,
    pub state: Arc<StreamState>,
    pub disk: Arc<DiskControl>,
    pub clock: StreamClock,
    pub mode: PlayMode,
    pub rate: u32,
    pub speed: f64,
    pub playback: Vec<PlaybackLane>,
    pub capture: Vec<RingProducer>,
    pub playback_channels: usize,
    pub capture_channels: usize,
    pub effects: Option<Arc<dyn RealtimeEffects>>,
    pub meters: MeterPort,
    pub dropouts: DropoutRecorder,
    pub frames_hint: Option<usize>,
}

pub(crate) struct HardwareCallback {
    token: i64,
    state: Arc<StreamState>,
    disk: Arc<DiskControl>,
    clock: StreamClock,
    mode: PlayMode,
    rate: f64,
    speed: f64,
    playback: Vec<PlaybackLane>,
    capture: Vec<RingProducer>,
    playback_channels: usize,
    capture_channels: usize,
    effects: Option<Arc<dyn RealtimeEffects>>,
    meters: MeterPort,
    dropouts: DropoutRecorder,
    scratch_frames: usize,
    planar: Vec<f32>,
    channel: Vec<f32>,
    pre_volume: Vec<f32>,
}

impl HardwareCallback {
    pub fn new(setup: CallbackSetup) -> Self {
        let mut callback = Self {
            token: setup.token,
            state: setup.state,
            disk: setup.disk,
            clock: setup.clock,
            mode: setup.mode,
            rate: setup.rate as f64,
            speed: setup.speed.abs().max(f64::EPSILON),
            playback: setup.playback,
            capture: setup.capture,
            playback_channels: setup.playback_channels,
            capture_channels: setup.capture_channels,
            effects: setup.effects,
            meters: setup.meters,
            dropouts: setup.dropouts,
            scratch_frames: 0,
            planar: Vec::new(),
            channel: Vec::new(),
            pre_volume: Vec::new(),
        };
        callback.reserve(setup.frames_hint.unwrap_or(DEFAULT_SCRATCH_FRAMES));
        callback
    }

    /// Grow scratch buffers. Only happens when the driver delivers a larger
    /// buffer than any before.
    fn reserve(&mut self, frames: usize) {
        if frames <= self.scratch_frames {
            return;
        }
        let lane_channels = self
            .playback
            .iter()
            .map(|lane| lane.rings.len())
            .max()
            .unwrap_or(0);
        self.planar.resize(lane_channels * frames, 0.0);
        self.channel.resize(frames, 0.0);
        self.pre_volume.resize(self.playback_channels * frames, 0.0);
        self.scratch_frames = frames;
    }

    fn is_current(&self) -> bool {
        self.token != 0 && self.state.current_token() == self.token
    }

    fn update_capture_meter(&self, input: &[f32], frames: usize) {
        let Some(meter) = self.meters.capture() else {
            return;
        };
        self.state.updating_capture_meter.set(true);
        // Re-check: the stop sequence clears `meters_enabled` and then waits
        // for this flag to drop.
        if self.state.meters_enabled.get() {
            meter.update(input, self.capture_channels, frames);
        }
        self.state.updating_capture_meter.set(false);
    }

    fn update_playback_meter(&self, samples: &[f32], frames: usize) {
        let Some(meter) = self.meters.playback() else {
            return;
        };
        self.state.updating_playback_meter.set(true);
        if self.state.meters_enabled.get() {
            meter.update(samples, self.playback_channels, frames);
        }
        self.state.updating_playback_meter.set(false);
    }

    /// Ask the control thread to pause or resume based on the input level.
    fn check_silence(&self, input: &[f32]) {
        let peak = input.iter().fold(0.0f32, |peak, sample| peak.max(sample.abs()));
        let paused = self.state.paused.get();
        let silent = peak < self.state.silence_level.get();
        if silent && !paused {
            self.state.request(PauseRequest::Pause);
        } else if !silent && paused {
            self.state.request(PauseRequest::Resume);
        }
    }

    fn playthrough(&self, input: &[f32], output: &mut [f32], frames: usize) {
        if !self.state.playthrough.get() || self.capture_channels == 0 || self.playback_channels == 0 {
            return;
        }
        let (ic, oc) = (self.capture_channels, self.playback_channels);
        for frame in 0..frames {
            for channel in 0..oc {
                if let Some(sample) = input.get(frame * ic + channel % ic) {
                    output[frame * oc + channel] += sample;
                }
            }
        }
    }

    /// Service a pending seek. Consumes this callback cycle; the silence it
    /// emits is accounted as pause time.
    fn seek(&mut self, output: &mut [f32], frames: usize) -> CallbackResult {
        output.fill(0.0);
        let target = self.state.seek_target.get();

        self.disk.request_loop(false);
        while self.disk.loop_active() {
            if !self.is_current() {
                return CallbackResult::Abort;
            }
            thread::sleep(SEEK_POLL);
        }

        for lane in &mut self.playback {
            for ring in &mut lane.rings {
                ring.clear();
            }
        }

        self.disk.post_seek(target);
        self.disk.run_once.set(true);
        self.disk.wake();
        while self.disk.run_once.get() {
            if !self.is_current() {
                return CallbackResult::Abort;
            }
            thread::sleep(SEEK_POLL);
        }

        self.clock.seek(target);
        self.clock.add_pause(frames);
        self.disk.request_loop(true);
        CallbackResult::Continue
    }

    fn mix_playback(&mut self, output: &mut [f32], frames: usize) {
        if self.playback.is_empty() {
            return;
        }
        let any_solo = self.playback.iter().any(|lane| lane.controls.solo.get());
        if let Some(effects) = &self.effects {
            effects.process_start();
        }

        let oc = self.playback_channels;
        for lane in &mut self.playback {
            let controls = &lane.controls;
            if controls.mute.get() || (any_solo && !controls.solo.get()) {
                for ring in &mut lane.rings {
                    ring.discard(frames);
                }
                continue;
            }

            let channels = lane.rings.len();
            let planar = &mut self.planar[..channels * frames];
            for (ring, dest) in lane.rings.iter_mut().zip(planar.chunks_exact_mut(frames)) {
                let got = ring.get(dest);
                dest[got..].fill(0.0);
            }

            if let Some(effects) = &self.effects {
                if controls.selected.get() {
                    effects.process(lane.group, planar, channels, frames);
                }
            }

            if oc == 0 {
                continue;
            }
            if channels == 1 {
                let mono = &planar[..frames];
                for out_channel in 0..oc {
                    let gain = controls.channel_gain(out_channel);
                    for (frame, sample) in mono.iter().enumerate() {
                        output[frame * oc + out_channel] += sample * gain;
                    }
                }
            } else {
                for (channel, block) in planar.chunks_exact(frames).enumerate() {
                    let out_channel = channel % oc;
                    let gain = controls.channel_gain(out_channel);
                    for (frame, sample) in block.iter().enumerate() {
                        output[frame * oc + out_channel] += sample * gain;
                    }
                }
            }
        }

        if let Some(effects) = &self.effects {
            effects.process_end();
        }
    }

    fn push_capture(&mut self, input: &[f32], frames: usize, status: StatusFlags) {
        if self.capture.is_empty() {
            return;
        }
        let space = self
            .capture
            .iter()
            .map(RingProducer::avail_for_put)
            .min()
            .unwrap_or(0);
        let len = frames.min(space);
        let overflow = status.contains(StatusFlags::INPUT_OVERFLOW);
        if len < frames || overflow {
            let lost = frames - len;
            let gap = if lost > 0 { lost } else { frames };
            self.dropouts.record(
                Dropout {
                    kind: DropoutKind::Capture,
                    start: self.clock.track_time(),
                    duration: gap as f64 / self.rate,
                },
                lost as u64,
            );
        }

        let ic = self.capture_channels;
        for (channel, ring) in self.capture.iter_mut().enumerate() {
            let scratch = &mut self.channel[..len];
            for (frame, sample) in scratch.iter_mut().enumerate() {
                *sample = input.get(frame * ic + channel).copied().unwrap_or(0.0);
            }
            ring.put(scratch);
        }
    }
}

impl AudioCallback for HardwareCallback {
    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        frames: usize,
        info: &CallbackInfo,
    ) -> CallbackResult {
        if frames == 0 {
            return CallbackResult::Continue;
        }
        self.reserve(frames);
        self.meters.poll();
        let len = (frames * self.playback_channels).min(output.len());
        let output = &mut output[..len];
        let meters_on = self.state.meters_enabled.get();
        let streaming = self.is_current();

        if streaming {
            self.clock.observe(info, frames);
        }
        if meters_on {
            self.update_capture_meter(input, frames);
        }
        if streaming && self.capture_channels > 0 && self.state.sound_activated.get() {
            self.check_silence(input);
        }

        output.fill(0.0);
        if self.state.paused.get() || !streaming {
            self.playthrough(input, output, frames);
            if streaming {
                self.clock.add_pause(frames);
            } else if meters_on {
                self.update_playback_meter(output, frames);
            }
            return CallbackResult::Continue;
        }

        if self.state.seek_pending.swap(false) {
            return self.seek(output, frames);
        }

        self.playthrough(input, output, frames);
        self.mix_playback(output, frames);

        let pre_volume = meters_on && self.state.meter_pre_volume.get();
        if pre_volume {
            self.pre_volume[..output.len()].copy_from_slice(output);
        }
        if self.state.emulate_output_volume.get() {
            let volume = self.state.output_volume.get();
            for sample in output.iter_mut() {
                *sample *= volume;
            }
        }
        for sample in output.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.push_capture(input, frames, info.status);

        if info.status.contains(StatusFlags::OUTPUT_UNDERFLOW) {
            self.dropouts.record(
                Dropout {
                    kind: DropoutKind::Playback,
                    start: self.clock.track_time(),
                    duration: frames as f64 / self.rate,
                },
                0,
            );
        }

        let speed = if self.mode == PlayMode::Interactive {
            self.state.speed.get().abs()
        } else {
            self.speed
        };
        self.clock.advance(frames, speed);

        let result = if self.mode == PlayMode::Straight && self.clock.reached_end() {
            self.state.completed.set(true);
            CallbackResult::Complete
        } else {
            CallbackResult::Continue
        };

        if meters_on {
            if pre_volume {
                let len = output.len();
                self.update_playback_meter(&self.pre_volume[..len], frames);
            } else {
                self.update_playback_meter(output, frames);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use approx::assert_relative_eq;
    use basedrop::Collector;
    use duplex_transport::SampleFormat;

    use crate::meter::{LevelMeter, Meter, meter_slot};
    use crate::options::SyncMode;
    use crate::ring::RingBuffer;
    use crate::time::SharedClock;

    struct Harness {
        callback: HardwareCallback,
        state: Arc<StreamState>,
        clock: Arc<SharedClock>,
        dropouts: rtrb::Consumer<Dropout>,
        lost: Arc<AtomicU64>,
        _collector: Collector,
    }

    struct Lanes {
        playback: Vec<PlaybackLane>,
        capture: Vec<RingProducer>,
        playback_channels: usize,
        capture_channels: usize,
    }

    fn harness(lanes: Lanes, mode: PlayMode, t1: f64, rate: u32, capture_meter: Option<Arc<dyn Meter>>) -> Harness {
        let collector = Collector::new();
        let handle = collector.handle();
        let state = Arc::new(StreamState::default());
        state.token.store(1, Ordering::Release);
        let shared_clock = Arc::new(SharedClock::default());
        let (_meter_tx, meter_rx) = rtrb::RingBuffer::new(4);
        let (drop_tx, drop_rx) = rtrb::RingBuffer::new(64);
        let lost = Arc::new(AtomicU64::new(0));

        let callback = HardwareCallback::new(CallbackSetup {
            token: 1,
            state: Arc::clone(&state),
            disk: Arc::default(),
            clock: StreamClock::new(Arc::clone(&shared_clock), rate, 0.0, t1, mode, SyncMode::Estimate),
            mode,
            rate,
            speed: 1.0,
            playback: lanes.playback,
            capture: lanes.capture,
            playback_channels: lanes.playback_channels,
            capture_channels: lanes.capture_channels,
            effects: None,
            meters: MeterPort::new(meter_rx, meter_slot(&handle, capture_meter), meter_slot(&handle, None)),
            dropouts: DropoutRecorder::new(drop_tx, Arc::clone(&lost)),
            frames_hint: Some(512),
        });

        Harness {
            callback,
            state,
            clock: shared_clock,
            dropouts: drop_rx,
            lost,
            _collector: collector,
        }
    }

    fn info() -> CallbackInfo {
        CallbackInfo {
            system_time: 0.0,
            output_dac_time: None,
            status: StatusFlags::empty(),
        }
    }

    fn lane(channels: usize, capacity: usize) -> (PlaybackLane, Vec<RingProducer>) {
        let mut producers = Vec::new();
        let mut rings = Vec::new();
        for _ in 0..channels {
            let (tx, rx) = RingBuffer::try_new(capacity, SampleFormat::Float32).unwrap();
            producers.push(tx);
            rings.push(rx);
        }
        let lane = PlaybackLane {
            rings,
            controls: Arc::default(),
            group: 0,
        };
        (lane, producers)
    }

    #[test]
    fn test_straight_playback_completes_after_87_callbacks() {
        let (playback, _producers) = lane(1, 1024);
        let lanes = Lanes {
            playback: vec![playback],
            capture: Vec::new(),
            playback_channels: 2,
            capture_channels: 0,
        };
        let mut h = harness(lanes, PlayMode::Straight, 1.0, 44100, None);
        let mut output = vec![0.0; 1024];

        for _ in 0..86 {
            assert_eq!(h.callback.process(&[], &mut output, 512, &info()), CallbackResult::Continue);
        }
        assert_eq!(h.callback.process(&[], &mut output, 512, &info()), CallbackResult::Complete);
        assert!(h.clock.track_time() >= 1.0);
        assert!(h.state.completed.get());
    }

    #[test]
    fn test_capture_shortfall_records_one_dropout() {
        let (tx, _rx) = RingBuffer::try_new(900, SampleFormat::Float32).unwrap();
        let lanes = Lanes {
            playback: Vec::new(),
            capture: vec![tx],
            playback_channels: 0,
            capture_channels: 1,
        };
        let mut h = harness(lanes, PlayMode::Straight, 10.0, 44100, None);
        let input = vec![0.1; 1024];

        h.callback.process(&[0.0; 100], &mut [], 100, &info());
        let before = h.clock.track_time();
        h.callback.process(&input, &mut [], 1024, &info());

        let dropout = h.dropouts.pop().unwrap();
        assert!(h.dropouts.pop().is_err());
        assert_eq!(dropout.kind, DropoutKind::Capture);
        assert_relative_eq!(dropout.start, before);
        assert_relative_eq!(dropout.duration, 224.0 / 44100.0);
        assert_eq!(h.lost.load(Ordering::Acquire), 224);
    }

    #[test]
    fn test_capture_of_1024_into_900_frames() {
        let (tx, rx) = RingBuffer::try_new(900, SampleFormat::Float32).unwrap();
        let lanes = Lanes {
            playback: Vec::new(),
            capture: vec![tx],
            playback_channels: 0,
            capture_channels: 1,
        };
        let mut h = harness(lanes, PlayMode::Straight, 10.0, 44100, None);

        h.callback.process(&vec![0.1; 1024], &mut [], 1024, &info());

        let dropout = h.dropouts.pop().unwrap();
        assert_relative_eq!(dropout.start, 0.0);
        assert_relative_eq!(dropout.duration, 124.0 / 44100.0);
        assert_eq!(h.lost.load(Ordering::Acquire), 124);
        assert_eq!(rx.avail_for_get(), 900);
    }

    #[test]
    fn test_input_overflow_without_shortfall() {
        let (tx, _rx) = RingBuffer::try_new(4096, SampleFormat::Float32).unwrap();
        let lanes = Lanes {
            playback: Vec::new(),
            capture: vec![tx],
            playback_channels: 0,
            capture_channels: 1,
        };
        let mut h = harness(lanes, PlayMode::Straight, 10.0, 1000, None);
        let mut status = info();
        status.status = StatusFlags::INPUT_OVERFLOW;

        h.callback.process(&[0.0; 100], &mut [], 100, &status);

        let dropout = h.dropouts.pop().unwrap();
        assert_relative_eq!(dropout.duration, 0.1);
        assert_eq!(h.lost.load(Ordering::Acquire), 0);
    }

    #[test]
    fn test_capture_deinterleaves_channels() {
        let (left_tx, mut left_rx) = RingBuffer::try_new(16, SampleFormat::Float32).unwrap();
        let (right_tx, mut right_rx) = RingBuffer::try_new(16, SampleFormat::Float32).unwrap();
        let lanes = Lanes {
            playback: Vec::new(),
            capture: vec![left_tx, right_tx],
            playback_channels: 0,
            capture_channels: 2,
        };
        let mut h = harness(lanes, PlayMode::Straight, 10.0, 1000, None);

        h.callback.process(&[0.1, 0.2, 0.3, 0.4], &mut [], 2, &info());

        let mut out = [0.0; 2];
        left_rx.get(&mut out);
        assert_eq!(out, [0.1, 0.3]);
        right_rx.get(&mut out);
        assert_eq!(out, [0.2, 0.4]);
    }

    #[test]
    fn test_solo_discards_other_tracks() {
        let (a, mut a_tx) = lane(1, 64);
        let (b, mut b_tx) = lane(1, 64);
        b.controls.solo.set(true);
        let lanes = Lanes {
            playback: vec![a, b],
            capture: Vec::new(),
            playback_channels: 1,
            capture_channels: 0,
        };
        let mut h = harness(lanes, PlayMode::Looped, 10.0, 1000, None);
        a_tx[0].put(&[0.5; 4]);
        b_tx[0].put(&[0.25; 4]);
        let mut output = [0.0; 4];

        h.callback.process(&[], &mut output, 4, &info());

        assert_eq!(output, [0.25; 4]);
        assert_eq!(a_tx[0].avail_for_put(), 64);
    }

    #[test]
    fn test_mute_and_short_read_zero_pads() {
        let (a, mut a_tx) = lane(1, 64);
        let (b, mut b_tx) = lane(1, 64);
        a.controls.mute.set(true);
        let lanes = Lanes {
            playback: vec![a, b],
            capture: Vec::new(),
            playback_channels: 1,
            capture_channels: 0,
        };
        let mut h = harness(lanes, PlayMode::Looped, 10.0, 1000, None);
        a_tx[0].put(&[0.5; 4]);
        b_tx[0].put(&[0.25; 2]);
        let mut output = [9.0; 4];

        h.callback.process(&[], &mut output, 4, &info());

        assert_eq!(output, [0.25, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_mono_track_is_panned_to_both_outputs() {
        let (mono, mut tx) = lane(1, 64);
        mono.controls.pan.set(-0.5);
        mono.controls.gain.set(0.5);
        let lanes = Lanes {
            playback: vec![mono],
            capture: Vec::new(),
            playback_channels: 2,
            capture_channels: 0,
        };
        let mut h = harness(lanes, PlayMode::Looped, 10.0, 1000, None);
        tx[0].put(&[1.0; 2]);
        let mut output = [0.0; 4];

        h.callback.process(&[], &mut output, 2, &info());

        assert_eq!(output, [0.5, 0.25, 0.5, 0.25]);
    }

    #[test]
    fn test_output_is_clipped_and_volume_emulated() {
        let (a, mut a_tx) = lane(1, 64);
        let (b, mut b_tx) = lane(1, 64);
        let lanes = Lanes {
            playback: vec![a, b],
            capture: Vec::new(),
            playback_channels: 1,
            capture_channels: 0,
        };
        let mut h = harness(lanes, PlayMode::Looped, 10.0, 1000, None);
        a_tx[0].put(&[0.8, 0.2]);
        b_tx[0].put(&[0.8, 0.2]);
        h.state.emulate_output_volume.set(true);
        h.state.output_volume.set(0.5);
        let mut output = [0.0; 2];

        h.callback.process(&[], &mut output, 2, &info());
        assert_relative_eq!(output[0], 0.8);
        assert_relative_eq!(output[1], 0.2);

        h.state.output_volume.set(1.0);
        a_tx[0].put(&[0.8]);
        b_tx[0].put(&[0.8]);
        h.callback.process(&[], &mut output[..1], 1, &info());
        assert_eq!(output[0], 1.0);
    }

    #[test]
    fn test_pause_emits_playthrough_and_holds_track_time() {
        let (tx, rx) = RingBuffer::try_new(64, SampleFormat::Float32).unwrap();
        let lanes = Lanes {
            playback: Vec::new(),
            capture: vec![tx],
            playback_channels: 2,
            capture_channels: 1,
        };
        let mut h = harness(lanes, PlayMode::Straight, 10.0, 1000, None);
        h.state.paused.set(true);
        h.state.playthrough.set(true);
        let mut output = [0.0; 4];

        let result = h.callback.process(&[0.3, 0.6], &mut output, 2, &info());

        assert_eq!(result, CallbackResult::Continue);
        assert_eq!(output, [0.3, 0.3, 0.6, 0.6]);
        assert_eq!(rx.avail_for_get(), 0);
        assert_eq!(h.clock.track_time(), 0.0);
        assert_relative_eq!(h.clock.pause_time(), 0.002);
    }

    #[test]
    fn test_sound_activation_requests_pause_and_resume() {
        let (tx, _rx) = RingBuffer::try_new(64, SampleFormat::Float32).unwrap();
        let lanes = Lanes {
            playback: Vec::new(),
            capture: vec![tx],
            playback_channels: 0,
            capture_channels: 1,
        };
        let mut h = harness(lanes, PlayMode::Straight, 10.0, 1000, None);
        h.state.sound_activated.set(true);
        h.state.silence_level.set(0.1);

        h.callback.process(&[0.01; 4], &mut [], 4, &info());
        assert_eq!(h.state.take_request(), Some(PauseRequest::Pause));

        h.state.paused.set(true);
        h.callback.process(&[0.5; 4], &mut [], 4, &info());
        assert_eq!(h.state.take_request(), Some(PauseRequest::Resume));
    }

    #[test]
    fn test_stale_token_only_feeds_meters() {
        let meter = Arc::new(LevelMeter::new(1));
        let (tx, rx) = RingBuffer::try_new(64, SampleFormat::Float32).unwrap();
        let lanes = Lanes {
            playback: Vec::new(),
            capture: vec![tx],
            playback_channels: 0,
            capture_channels: 1,
        };
        let mut h = harness(lanes, PlayMode::Straight, 10.0, 1000, Some(meter.clone()));
        h.state.meters_enabled.set(true);
        h.state.token.store(0, Ordering::Release);

        h.callback.process(&[0.7, -0.2], &mut [], 2, &info());

        assert_relative_eq!(meter.peak(0), 0.7);
        assert_eq!(rx.avail_for_get(), 0);
        assert_eq!(h.clock.track_time(), 0.0);
    }

    #[test]
    fn test_disabled_meters_are_not_touched() {
        let meter = Arc::new(LevelMeter::new(1));
        let (tx, _rx) = RingBuffer::try_new(64, SampleFormat::Float32).unwrap();
        let lanes = Lanes {
            playback: Vec::new(),
            capture: vec![tx],
            playback_channels: 0,
            capture_channels: 1,
        };
        let mut h = harness(lanes, PlayMode::Straight, 10.0, 1000, Some(meter.clone()));

        h.callback.process(&[0.7], &mut [], 1, &info());

        assert_eq!(meter.peak(0), 0.0);
        assert!(!h.state.updating_capture_meter.get());
    }
}
