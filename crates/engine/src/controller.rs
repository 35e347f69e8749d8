//! Stream lifecycle.
//!
//! [`AudioIo`] is the only owner of rings, driver streams and the disk
//! thread. A stream goes through open (allocate, with halving retries),
//! prime (one synchronous disk pass), stream (token published, hardware and
//! disk loop running) and drain (loop stopped, one final pass, tracks
//! corrected) before the engine is idle again.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use basedrop::Collector;
use duplex_transport::{RealtimeEffects, Resampler, SampleFormat, SincStreamResampler};

use crate::callback::{CallbackSetup, HardwareCallback, PlaybackLane};
use crate::devices::DeviceCatalog;
use crate::disk::{CaptureSink, DiskThread, DiskWork, PlaybackFeed};
use crate::driver::{AudioDriver, ChannelSpec, DeviceInfo, DriverStream, StreamRequest};
use crate::dropout::{DROPOUT_QUEUE_CAPACITY, Dropout, DropoutKind, DropoutLog, DropoutRecorder};
use crate::error::{AllocError, DriverError, StartStreamError};
use crate::meter::{Meter, MeterPort, MeterUpdate, meter_slot};
use crate::midi::MidiSync;
use crate::options::{CaptureTrack, PlayMode, PlaybackTrack, RingSizing, StreamOptions};
use crate::ring::{HeapAllocator, RingAllocator, RingConsumer, RingProducer};
use crate::state::{PauseRequest, StreamState};
use crate::time::{SharedClock, StreamClock};

/// Smallest ring, and smallest playback transfer, a stream may start with.
pub const MIN_RING_FRAMES: usize = 100;

/// Input channels opened for monitoring when the options name none.
const DEFAULT_MONITOR_CHANNELS: u16 = 2;

const METER_QUEUE_CAPACITY: usize = 16;

const WAIT_POLL: Duration = Duration::from_millis(1);

/// Shown once per stream when latency correction pushed a recording before zero.
pub const NEGATIVE_START_WARNING: &str = "Latency correction would have moved the recorded audio before zero.\n\
The correction was not applied; you may have to move the recording into place.";

/// Identifies one stream. Tokens only ever increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamToken(i64);

impl StreamToken {
    pub fn get(self) -> i64 {
        self.0
    }
}

/// What a stream left behind.
pub struct StopReport {
    pub token: StreamToken,
    /// Input frames that never reached a capture ring.
    pub lost_samples: u64,
    pub dropouts: Vec<Dropout>,
    /// A track failed to store audio; everything before the failure is kept.
    pub recording_error: bool,
    /// The callback reached the end of a straight selection.
    pub completed: bool,
    /// Capture tracks, flushed and latency corrected, in the order given.
    pub recorded: Vec<CaptureTrack>,
    /// Messages for the user, each raised at most once per stream.
    pub warnings: Vec<String>,
}

struct Rings {
    playback: Vec<(Vec<RingProducer>, Vec<RingConsumer>)>,
    capture: Vec<(RingProducer, RingConsumer)>,
    samples_to_copy: usize,
    min_capture_frames: usize,
}

struct ActiveStream {
    token: StreamToken,
    stream: Box<dyn DriverStream>,
    t0: f64,
    rate: u32,
    had_playback: bool,
    latency_correction: f64,
}

/// The audio engine: owns the hardware stream, the rings and the disk
/// thread. Control-thread only.
pub struct AudioIo {
    driver: Box<dyn AudioDriver>,
    allocator: Arc<dyn RingAllocator>,
    effects: Option<Arc<dyn RealtimeEffects>>,
    disk: DiskThread,
    state: Arc<StreamState>,
    clock: Arc<SharedClock>,
    active: Option<ActiveStream>,
    monitor: Option<Box<dyn DriverStream>>,
    dropouts: DropoutLog,
    capture_meter: Option<Arc<dyn Meter>>,
    playback_meter: Option<Arc<dyn Meter>>,
    meter_updates: Option<rtrb::Producer<MeterUpdate>>,
    collector: Collector,
    last_token: i64,
    catalog: DeviceCatalog,
}

impl AudioIo {
    pub fn new(driver: Box<dyn AudioDriver>) -> anyhow::Result<Self> {
        let disk = DiskThread::spawn().context("failed to spawn the disk thread")?;
        Ok(Self {
            driver,
            allocator: Arc::new(HeapAllocator),
            effects: None,
            disk,
            state: Arc::default(),
            clock: Arc::default(),
            active: None,
            monitor: None,
            dropouts: DropoutLog::default(),
            capture_meter: None,
            playback_meter: None,
            meter_updates: None,
            collector: Collector::new(),
            last_token: 0,
            catalog: DeviceCatalog::new(),
        })
    }

    pub fn with_allocator(mut self, allocator: Arc<dyn RingAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Install the realtime effect pipeline used by later streams.
    pub fn set_effects(&mut self, effects: Option<Arc<dyn RealtimeEffects>>) {
        if self.is_busy() {
            log::warn!("effects changed while streaming; applies to the next stream");
        }
        self.effects = effects;
    }

    pub fn start_stream(
        &mut self,
        playback: Vec<PlaybackTrack>,
        capture: Vec<CaptureTrack>,
        t0: f64,
        t1: f64,
        options: &StreamOptions,
    ) -> Result<StreamToken, StartStreamError> {
        if self
            .state
            .token
            .compare_exchange(0, -1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::info!("stream start refused: engine busy");
            return Err(StartStreamError::Busy);
        }

        match self.open_stream(playback, capture, t0, t1, options) {
            Ok(token) => Ok(token),
            Err(err) => {
                self.state.token.store(0, Ordering::Release);
                Err(err)
            }
        }
    }

    fn open_stream(
        &mut self,
        playback: Vec<PlaybackTrack>,
        capture: Vec<CaptureTrack>,
        t0: f64,
        t1: f64,
        options: &StreamOptions,
    ) -> Result<StreamToken, StartStreamError> {
        self.close_monitor();
        if playback.is_empty() && capture.is_empty() {
            return Err(StartStreamError::NoTracks);
        }

        let rate = options.sample_rate;
        let sizing = RingSizing::for_tracks(playback.len(), capture.len()).with_overrides(&options.sizing);
        let playback_channels: Vec<usize> = playback.iter().map(|track| track.mixer.channels()).collect();
        let capture_formats: Vec<SampleFormat> = capture.iter().map(|track| track.sample_format()).collect();
        let rings = self.allocate_rings(&playback_channels, &capture_formats, rate, sizing)?;

        let mut sinks = Vec::with_capacity(capture.len());
        let mut capture_rings = Vec::with_capacity(capture.len());
        for (mut storage, (producer, consumer)) in capture.into_iter().zip(rings.capture) {
            let resampler: Option<Box<dyn Resampler>> = if storage.rate() != rate {
                let resampler =
                    SincStreamResampler::new(rate, storage.rate()).map_err(|err| StartStreamError::Resampler {
                        track: storage.name().to_owned(),
                        rate: storage.rate(),
                        reason: err.to_string(),
                    })?;
                Some(Box::new(resampler) as Box<dyn Resampler>)
            } else {
                None
            };
            storage.set_offset(t0);
            sinks.push(CaptureSink::new(storage, consumer, resampler));
            capture_rings.push(producer);
        }

        let had_playback = !playback.is_empty();
        let mut feeds = Vec::with_capacity(playback.len());
        let mut lanes = Vec::with_capacity(playback.len());
        for (group, (track, (producers, consumers))) in playback.into_iter().zip(rings.playback).enumerate() {
            feeds.push(PlaybackFeed {
                mixer: track.mixer,
                rings: producers,
            });
            lanes.push(PlaybackLane {
                rings: consumers,
                controls: track.controls,
                group,
            });
        }

        self.apply_options(options);

        let playback_out = if had_playback || options.playthrough {
            options.playback_channels
        } else {
            0
        };
        let capture_in = if sinks.is_empty() {
            0
        } else {
            options.capture_channels.unwrap_or(0).max(sinks.len() as u16)
        };
        let request = StreamRequest {
            sample_rate: rate,
            frames_per_buffer: options.frames_per_buffer,
            playback: (playback_out > 0).then(|| ChannelSpec {
                device: options.playback_device.clone(),
                channels: playback_out,
            }),
            capture: (capture_in > 0).then(|| ChannelSpec {
                device: options.capture_device.clone(),
                channels: capture_in,
            }),
        };

        let (meter_tx, meters) = self.meter_port();
        let (dropout_tx, dropout_rx) = rtrb::RingBuffer::new(DROPOUT_QUEUE_CAPACITY);
        self.state.lost_samples.store(0, Ordering::Release);
        let recorder = DropoutRecorder::new(dropout_tx, Arc::clone(&self.state.lost_samples));

        let token = self.last_token + 1;
        let work = DiskWork::new(
            feeds,
            sinks,
            Arc::clone(&self.state),
            rate,
            t0,
            t1,
            options.mode,
            rings.samples_to_copy,
            rings.min_capture_frames,
        );
        let callback = HardwareCallback::new(CallbackSetup {
            token,
            state: Arc::clone(&self.state),
            disk: Arc::clone(self.disk.control()),
            clock: StreamClock::new(Arc::clone(&self.clock), rate, t0, t1, options.mode, options.sync_mode),
            mode: options.mode,
            rate,
            speed: options.speed,
            playback: lanes,
            capture: capture_rings,
            playback_channels: playback_out as usize,
            capture_channels: capture_in as usize,
            effects: self.effects.clone(),
            meters,
            dropouts: recorder,
            frames_hint: options.frames_per_buffer.map(|frames| frames as usize),
        });

        let mut stream = self.driver.open_stream(&request, Box::new(callback)).inspect_err(|err| {
            log::error!("failed to open stream at {rate} Hz: {err}");
        })?;

        if let Some(effects) = &self.effects {
            effects.initialize(rate as f64);
            for (group, channels) in playback_channels.iter().enumerate() {
                effects.add_processor(group, *channels, rate as f64);
            }
        }

        self.disk.install(work);
        self.disk.run_once_and_wait();

        self.state.token.store(token, Ordering::Release);
        if let Err(err) = stream.start() {
            log::error!("failed to start stream {token}: {err}");
            drop(stream);
            self.disk.take_work();
            if let Some(effects) = &self.effects {
                effects.finalize();
            }
            return Err(err.into());
        }
        self.disk.start_loop();

        self.last_token = token;
        self.dropouts.attach(dropout_rx);
        self.meter_updates = Some(meter_tx);
        self.state.meters_enabled.set(true);
        self.active = Some(ActiveStream {
            token: StreamToken(token),
            stream,
            t0,
            rate,
            had_playback,
            latency_correction: options.latency_correction_ms / 1000.0,
        });
        log::info!(
            "stream {token} started at {rate} Hz ({} playback, {} capture channels)",
            playback_out,
            capture_in
        );
        Ok(StreamToken(token))
    }

    fn apply_options(&self, options: &StreamOptions) {
        let state = &self.state;
        state.paused.set(false);
        state.completed.set(false);
        state.seek_pending.set(false);
        state.speed.set(options.speed.abs().max(f64::EPSILON));
        state.playthrough.set(options.playthrough);
        state.emulate_output_volume.set(options.emulate_output_volume);
        state.output_volume.set(options.output_volume);
        state.meter_pre_volume.set(options.meter_pre_volume);
        state.sound_activated.set(options.silence_level.is_some());
        state.silence_level.set(options.silence_level.unwrap_or(0.0));
        state.take_request();
    }

    /// Allocate every ring, halving the sizes after each failure until they
    /// would drop below [`MIN_RING_FRAMES`].
    fn allocate_rings(
        &self,
        playback_channels: &[usize],
        capture_formats: &[SampleFormat],
        rate: u32,
        mut sizing: RingSizing,
    ) -> Result<Rings, StartStreamError> {
        let rate = rate as f64;
        loop {
            let playback_frames = (sizing.playback_secs * rate).round() as usize;
            let capture_frames = (sizing.capture_secs * rate).round() as usize;
            let samples_to_copy = (sizing.max_playback_secs_to_copy * rate).round() as usize;
            let min_capture_frames = (sizing.min_capture_secs_to_copy * rate).round() as usize;

            let playback_too_small = !playback_channels.is_empty()
                && (playback_frames < MIN_RING_FRAMES || samples_to_copy < MIN_RING_FRAMES);
            let capture_too_small = !capture_formats.is_empty() && capture_frames < MIN_RING_FRAMES;
            if playback_too_small || capture_too_small {
                log::error!("ring buffers would be below {MIN_RING_FRAMES} frames; giving up");
                return Err(StartStreamError::OutOfMemory);
            }

            match self.try_allocate(playback_channels, capture_formats, playback_frames, capture_frames) {
                Ok((playback, capture)) => {
                    log::debug!(
                        "rings: {playback_frames} playback frames, {capture_frames} capture frames, \
                         {samples_to_copy} per playback transfer"
                    );
                    return Ok(Rings {
                        playback,
                        capture,
                        samples_to_copy,
                        min_capture_frames,
                    });
                }
                Err(err) => {
                    log::warn!("{err}; retrying with half the buffer size");
                    sizing = sizing.halved();
                }
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn try_allocate(
        &self,
        playback_channels: &[usize],
        capture_formats: &[SampleFormat],
        playback_frames: usize,
        capture_frames: usize,
    ) -> Result<(Vec<(Vec<RingProducer>, Vec<RingConsumer>)>, Vec<(RingProducer, RingConsumer)>), AllocError>
    {
        let mut playback = Vec::with_capacity(playback_channels.len());
        for &channels in playback_channels {
            let mut producers = Vec::with_capacity(channels);
            let mut consumers = Vec::with_capacity(channels);
            for _ in 0..channels {
                let (producer, consumer) = self.allocator.allocate(playback_frames, SampleFormat::Float32)?;
                producers.push(producer);
                consumers.push(consumer);
            }
            playback.push((producers, consumers));
        }

        let capture = capture_formats
            .iter()
            .map(|format| self.allocator.allocate(capture_frames, *format))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((playback, capture))
    }

    fn meter_port(&self) -> (rtrb::Producer<MeterUpdate>, MeterPort) {
        let (tx, rx) = rtrb::RingBuffer::new(METER_QUEUE_CAPACITY);
        let handle = self.collector.handle();
        let port = MeterPort::new(
            rx,
            meter_slot(&handle, self.capture_meter.clone()),
            meter_slot(&handle, self.playback_meter.clone()),
        );
        (tx, port)
    }

    /// Keep the callback away from the meters until it is stopped.
    fn release_meters(&mut self) {
        self.state.meters_enabled.set(false);
        while self.state.updating_capture_meter.get() || self.state.updating_playback_meter.get() {
            thread::sleep(WAIT_POLL);
        }
        self.meter_updates = None;
    }

    /// Stop the current stream, drain what was captured and hand back the
    /// recorded tracks. Returns `None` if no stream was running.
    pub fn stop_stream(&mut self) -> Option<StopReport> {
        self.close_monitor();
        let ActiveStream {
            token,
            mut stream,
            t0,
            rate,
            had_playback,
            latency_correction,
        } = self.active.take()?;

        self.release_meters();
        if let Err(err) = stream.abort() {
            log::warn!("aborting stream {}: {err}", token.0);
        }
        drop(stream);

        self.disk.stop_loop_and_wait();
        self.disk.control().final_drain.set(true);
        self.disk.run_once_and_wait();
        let work = self.disk.take_work();
        let recording_error = self.disk.control().recording_error.get();

        if let Some(effects) = &self.effects {
            effects.finalize();
        }

        let dropouts = self.dropouts.finish();
        let lost_samples = self.state.lost_samples();
        let completed = self.state.completed.get();
        let mut warnings = Vec::new();

        let mut recorded: Vec<CaptureTrack> = work
            .map(|work| work.capture.into_iter().map(|sink| sink.storage).collect())
            .unwrap_or_default();
        for track in &mut recorded {
            track.flush();
        }

        if had_playback && !recorded.is_empty() {
            let mut warned = false;
            for track in &mut recorded {
                track.set_offset(t0 + latency_correction);
                if track.end_time() < 0.0 {
                    track.set_offset(t0);
                    if !warned {
                        warned = true;
                        log::warn!("{} would end before zero after latency correction; left uncorrected", track.name());
                        warnings.push(NEGATIVE_START_WARNING.to_owned());
                    }
                }
            }
        }

        for track in &mut recorded {
            let shift = track.offset() - t0;
            for dropout in dropouts.iter().filter(|dropout| dropout.kind == DropoutKind::Capture) {
                track.mark_dropout(dropout.start + shift, dropout.duration);
            }
        }

        if lost_samples > 0 {
            log::warn!("stream {} lost {lost_samples} input samples", token.0);
            warnings.push(format!(
                "{lost_samples} samples were lost while recording. The recorded tracks have gaps at the \
                 marked positions."
            ));
        }
        if recording_error {
            log::error!("stream {} stopped recording after a storage failure", token.0);
        }

        for meter in [&self.capture_meter, &self.playback_meter].into_iter().flatten() {
            meter.reset(rate);
        }
        self.state.completed.set(false);
        self.state.paused.set(false);
        self.state.token.store(0, Ordering::Release);
        self.collector.collect();
        log::info!("stream {} stopped", token.0);

        Some(StopReport {
            token,
            lost_samples,
            dropouts,
            recording_error,
            completed,
            recorded,
            warnings,
        })
    }

    /// Open a capture-only stream that feeds meters (and playthrough) but
    /// records nothing.
    pub fn start_monitoring(&mut self, options: &StreamOptions) -> Result<(), StartStreamError> {
        if self.is_busy() {
            return Err(StartStreamError::Busy);
        }
        self.close_monitor();

        let rate = options.sample_rate;
        let capture_in = options.capture_channels.unwrap_or(DEFAULT_MONITOR_CHANNELS);
        let playback_out = if options.playthrough {
            options.playback_channels
        } else {
            0
        };
        let request = StreamRequest {
            sample_rate: rate,
            frames_per_buffer: options.frames_per_buffer,
            playback: (playback_out > 0).then(|| ChannelSpec {
                device: options.playback_device.clone(),
                channels: playback_out,
            }),
            capture: Some(ChannelSpec {
                device: options.capture_device.clone(),
                channels: capture_in,
            }),
        };

        self.state.paused.set(false);
        self.state.sound_activated.set(false);
        self.state.playthrough.set(options.playthrough);

        let (meter_tx, meters) = self.meter_port();
        // Monitoring never records dropouts; the queue only satisfies the callback.
        let (dropout_tx, _) = rtrb::RingBuffer::new(1);
        let callback = HardwareCallback::new(CallbackSetup {
            token: 0,
            state: Arc::clone(&self.state),
            disk: Arc::clone(self.disk.control()),
            clock: StreamClock::new(Arc::clone(&self.clock), rate, 0.0, 0.0, PlayMode::Straight, options.sync_mode),
            mode: PlayMode::Straight,
            rate,
            speed: 1.0,
            playback: Vec::new(),
            capture: Vec::new(),
            playback_channels: playback_out as usize,
            capture_channels: capture_in as usize,
            effects: None,
            meters,
            dropouts: DropoutRecorder::new(dropout_tx, Arc::default()),
            frames_hint: options.frames_per_buffer.map(|frames| frames as usize),
        });

        let mut stream = self.driver.open_stream(&request, Box::new(callback)).inspect_err(|err| {
            log::error!("failed to open monitoring stream: {err}");
        })?;
        stream.start()?;

        self.meter_updates = Some(meter_tx);
        self.state.meters_enabled.set(true);
        self.monitor = Some(stream);
        log::info!("monitoring {capture_in} input channels at {rate} Hz");
        Ok(())
    }

    fn close_monitor(&mut self) {
        let Some(mut monitor) = self.monitor.take() else {
            return;
        };
        self.release_meters();
        if let Err(err) = monitor.abort() {
            log::warn!("aborting monitoring stream: {err}");
        }
        drop(monitor);
        self.collector.collect();
        log::debug!("monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.is_some()
    }

    /// A stream owns the engine or is being started.
    pub fn is_busy(&self) -> bool {
        self.state.current_token() != 0
    }

    pub fn is_stream_active(&self) -> bool {
        self.active.as_ref().is_some_and(|active| active.stream.is_active())
            || self.monitor.as_ref().is_some_and(|monitor| monitor.is_active())
    }

    pub fn is_audio_token_active(&self, token: StreamToken) -> bool {
        token.0 > 0 && self.state.current_token() == token.0
    }

    /// Track time of the running stream.
    pub fn stream_time(&self) -> Option<f64> {
        (self.state.current_token() > 0).then(|| self.clock.track_time())
    }

    pub fn clock(&self) -> &Arc<SharedClock> {
        &self.clock
    }

    pub fn midi_sync(&self) -> MidiSync {
        MidiSync::new(Arc::clone(&self.clock), self.driver.clock())
    }

    pub fn set_paused(&self, paused: bool) {
        if self.state.paused.swap(paused) == paused {
            return;
        }
        if let Some(effects) = &self.effects {
            if paused {
                effects.suspend();
            } else {
                effects.resume();
            }
        }
        log::debug!("paused: {paused}");
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.get()
    }

    /// Ask the callback to move the running stream to `time`. Returns false
    /// if there is no stream.
    pub fn seek(&self, time: f64) -> bool {
        if self.state.current_token() <= 0 {
            return false;
        }
        self.state.seek_target.set(time);
        self.state.seek_pending.set(true);
        true
    }

    /// Playback speed; takes effect live in interactive mode.
    pub fn set_speed(&self, speed: f64) {
        self.state.speed.set(speed.abs().max(f64::EPSILON));
    }

    pub fn set_playthrough(&self, enabled: bool) {
        self.state.playthrough.set(enabled);
    }

    pub fn set_output_volume(&self, volume: f32) {
        self.state.output_volume.set(volume);
    }

    /// Pause or resume request raised by sound-activated recording.
    pub fn take_pause_request(&self) -> Option<PauseRequest> {
        self.state.take_request()
    }

    /// A capture track failed to store audio during the running stream.
    pub fn recording_error(&self) -> bool {
        self.active.is_some() && self.disk.control().recording_error.get()
    }

    /// The running straight stream reached its end.
    pub fn stream_completed(&self) -> bool {
        self.active.is_some() && self.state.completed.get()
    }

    pub fn lost_samples(&self) -> u64 {
        self.state.lost_samples()
    }

    pub fn set_capture_meter(&mut self, meter: Option<Arc<dyn Meter>>) {
        self.capture_meter = meter.clone();
        let slot = meter_slot(&self.collector.handle(), meter);
        self.send_meter(MeterUpdate::Capture(slot));
    }

    pub fn set_playback_meter(&mut self, meter: Option<Arc<dyn Meter>>) {
        self.playback_meter = meter.clone();
        let slot = meter_slot(&self.collector.handle(), meter);
        self.send_meter(MeterUpdate::Playback(slot));
    }

    fn send_meter(&mut self, update: MeterUpdate) {
        if let Some(updates) = self.meter_updates.as_mut() {
            if updates.push(update).is_err() {
                log::warn!("meter queue full; the change applies to the next stream");
            }
        }
        self.collector.collect();
    }

    /// Reclaim meter slots released by the callback and pick up dropouts.
    pub fn collect_garbage(&mut self) {
        self.dropouts.drain();
        self.collector.collect();
    }

    pub fn devices(&mut self) -> Result<Vec<DeviceInfo>, DriverError> {
        Ok(self.catalog.devices(self.driver.as_ref())?.to_vec())
    }

    pub fn supported_rates(&mut self, playback: Option<&str>, capture: Option<&str>) -> Result<Vec<u32>, DriverError> {
        self.catalog.supported_rates(self.driver.as_ref(), playback, capture)
    }

    pub fn best_rate(
        &mut self,
        playback: Option<&str>,
        capture: Option<&str>,
        requested: u32,
    ) -> Result<u32, DriverError> {
        self.catalog.best_rate(self.driver.as_ref(), playback, capture, requested)
    }

    pub fn optimal_rate(&mut self, playback: Option<&str>, capture: Option<&str>) -> Result<u32, DriverError> {
        self.catalog.optimal_rate(self.driver.as_ref(), playback, capture)
    }

    /// Call when the host reports a device change.
    pub fn invalidate_devices(&mut self) {
        self.catalog.invalidate();
    }
}

impl Drop for AudioIo {
    fn drop(&mut self) {
        self.stop_stream();
        self.close_monitor();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use duplex_render::{ClipMixer, MemoryTrack};
    use duplex_transport::AudioArc;

    use crate::driver::CallbackResult;
    use crate::meter::LevelMeter;
    use crate::options::SizingOverrides;
    use crate::test_support::{FakeDriver, ScriptedAllocator};

    fn engine() -> (AudioIo, FakeDriver) {
        let driver = FakeDriver::new();
        let io = AudioIo::new(Box::new(driver.clone())).unwrap();
        (io, driver)
    }

    /// One second of a mono ramp from 0 to 1 at 1 kHz.
    fn ramp() -> PlaybackTrack {
        let source = AudioArc::from_fn(1000, 1000, 1, |frame, _| frame as f32 / 1000.0);
        PlaybackTrack::new(ClipMixer::new(source, 1000).unwrap())
    }

    fn options() -> StreamOptions {
        StreamOptions {
            sample_rate: 1000,
            playback_channels: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_tokens_increase_and_busy_is_refused() {
        let (mut io, _driver) = engine();

        let first = io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options()).unwrap();
        assert!(io.is_audio_token_active(first));
        assert!(matches!(
            io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options()),
            Err(StartStreamError::Busy)
        ));
        assert!(io.is_audio_token_active(first));

        assert!(io.stop_stream().is_some());
        assert!(!io.is_audio_token_active(first));
        assert!(!io.is_busy());

        let second = io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options()).unwrap();
        assert!(second > first);
        assert!(io.stop_stream().is_some());
        assert!(io.stop_stream().is_none());
    }

    #[test]
    fn test_open_failure_releases_the_engine() {
        let (mut io, driver) = engine();
        driver.fail_open(Some("device busy"));

        let err = io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options()).unwrap_err();
        assert!(matches!(err, StartStreamError::Device(_)));
        assert!(!io.is_busy());

        driver.fail_open(None);
        let token = io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options()).unwrap();
        assert_eq!(token.get(), 1);
    }

    #[test]
    fn test_no_tracks_is_refused() {
        let (mut io, _driver) = engine();
        assert!(matches!(
            io.start_stream(Vec::new(), Vec::new(), 0.0, 1.0, &options()),
            Err(StartStreamError::NoTracks)
        ));
        assert!(!io.is_busy());
    }

    #[test]
    fn test_playback_is_primed_before_the_first_callback() {
        let (mut io, driver) = engine();
        io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options()).unwrap();
        assert!(driver.is_running());

        let (result, output) = driver.fire(10).unwrap();
        assert_eq!(result, CallbackResult::Continue);
        assert_relative_eq!(output[0], 0.0);
        assert_relative_eq!(output[9], 0.009, epsilon = 1e-5);
        assert_relative_eq!(io.stream_time().unwrap(), 0.01);
    }

    #[test]
    fn test_stop_drains_every_captured_frame() {
        let (mut io, driver) = engine();
        let track = MemoryTrack::new("in", 1000, SampleFormat::Float32);
        let handle = track.handle();
        let options = StreamOptions {
            capture_channels: Some(1),
            ..options()
        };
        io.start_stream(Vec::new(), vec![Box::new(track)], 0.0, 100.0, &options).unwrap();

        for i in 0..10 {
            driver.fire_input(&[0.25; 100], 100, i as f64 * 0.1).unwrap();
        }
        let report = io.stop_stream().unwrap();

        assert_eq!(handle.frames(), 1000);
        assert_eq!(report.recorded.len(), 1);
        assert_eq!(report.lost_samples, 0);
        assert!(!report.recording_error);
        assert!(report.warnings.is_empty());
        assert!(!driver.has_stream());
    }

    #[test]
    fn test_allocation_backs_off_by_halving() {
        let driver = FakeDriver::new();
        let allocator = Arc::new(ScriptedAllocator::failing_first(2));
        let mut io = AudioIo::new(Box::new(driver.clone()))
            .unwrap()
            .with_allocator(allocator.clone());
        let options = StreamOptions {
            sizing: SizingOverrides {
                playback_secs: Some(10.0),
                ..Default::default()
            },
            ..options()
        };

        io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options).unwrap();
        assert_eq!(allocator.requests(), vec![10_000, 5000, 2500]);
    }

    #[test]
    fn test_allocation_gives_up_at_the_floor() {
        let driver = FakeDriver::new();
        let allocator = Arc::new(ScriptedAllocator::always_failing());
        let mut io = AudioIo::new(Box::new(driver.clone()))
            .unwrap()
            .with_allocator(allocator.clone());
        let options = StreamOptions {
            sizing: SizingOverrides {
                playback_secs: Some(8.0),
                max_playback_secs_to_copy: Some(8.0),
                ..Default::default()
            },
            ..options()
        };

        let err = io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options).unwrap_err();
        assert!(matches!(err, StartStreamError::OutOfMemory));
        assert_eq!(allocator.requests(), vec![8000, 4000, 2000, 1000, 500, 250, 125]);
        assert!(!io.is_busy());
        assert!(driver.requests().is_empty());
    }

    #[test]
    fn test_seek_is_serviced_by_the_callback() {
        let (mut io, driver) = engine();
        io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options()).unwrap();
        driver.fire(10).unwrap();

        assert!(io.seek(0.5));
        let (result, output) = driver.fire(10).unwrap();
        assert_eq!(result, CallbackResult::Continue);
        assert!(output.iter().all(|sample| *sample == 0.0));
        assert_relative_eq!(io.stream_time().unwrap(), 0.5);

        let (_, output) = driver.fire(10).unwrap();
        assert_relative_eq!(output[0], 0.5, epsilon = 1e-4);
        assert_relative_eq!(io.stream_time().unwrap(), 0.51);
        // The silent seek cycle still reached the device.
        assert_relative_eq!(io.clock().audio_time(), 0.03);
        assert_relative_eq!(io.clock().pause_time(), 0.01);
    }

    #[test]
    fn test_paused_stream_holds_track_time() {
        let (mut io, driver) = engine();
        io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options()).unwrap();

        io.set_paused(true);
        driver.fire(100).unwrap();
        assert_eq!(io.stream_time(), Some(0.0));
        assert_relative_eq!(io.clock().pause_time(), 0.1);

        io.set_paused(false);
        driver.fire(100).unwrap();
        assert_relative_eq!(io.stream_time().unwrap(), 0.1);
    }

    #[test]
    fn test_straight_stream_reports_completion() {
        let (mut io, driver) = engine();
        io.start_stream(vec![ramp()], Vec::new(), 0.0, 0.45, &options()).unwrap();

        let mut results = Vec::new();
        for _ in 0..5 {
            results.push(driver.fire(100).unwrap().0);
        }

        assert_eq!(results.last(), Some(&CallbackResult::Complete));
        assert!(io.stream_completed());
        assert!(io.stop_stream().unwrap().completed);
    }

    #[test]
    fn test_latency_correction_shifts_recorded_tracks() {
        let (mut io, driver) = engine();
        let track = MemoryTrack::new("in", 1000, SampleFormat::Float32);
        let handle = track.handle();
        let options = StreamOptions {
            capture_channels: Some(1),
            ..options()
        };
        io.start_stream(vec![ramp()], vec![Box::new(track)], 1.0, 2.0, &options).unwrap();
        driver.fire_input(&[0.1; 100], 100, 0.0).unwrap();

        let report = io.stop_stream().unwrap();
        assert_relative_eq!(handle.offset(), 0.87);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_correction_past_zero_is_dropped_with_one_warning() {
        let (mut io, driver) = engine();
        let a = MemoryTrack::new("a", 1000, SampleFormat::Float32);
        let b = MemoryTrack::new("b", 1000, SampleFormat::Float32);
        let (ha, hb) = (a.handle(), b.handle());
        let options = StreamOptions {
            capture_channels: Some(2),
            ..options()
        };
        io.start_stream(vec![ramp()], vec![Box::new(a), Box::new(b)], 0.05, 1.0, &options)
            .unwrap();
        driver.fire_input(&[0.1; 100], 50, 0.0).unwrap();

        let report = io.stop_stream().unwrap();
        assert_eq!(ha.frames(), 50);
        assert_eq!(ha.offset(), 0.05);
        assert_eq!(hb.offset(), 0.05);
        assert_eq!(report.warnings, vec![NEGATIVE_START_WARNING.to_owned()]);
    }

    #[test]
    fn test_capture_dropouts_are_marked_on_tracks() {
        let (mut io, driver) = engine();
        let track = MemoryTrack::new("in", 1000, SampleFormat::Float32);
        let handle = track.handle();
        let options = StreamOptions {
            capture_channels: Some(1),
            sizing: SizingOverrides {
                capture_secs: Some(0.1),
                ..Default::default()
            },
            ..options()
        };
        io.start_stream(Vec::new(), vec![Box::new(track)], 2.0, 10.0, &options).unwrap();
        driver.fire_input(&[0.1; 150], 150, 0.0).unwrap();

        let report = io.stop_stream().unwrap();
        assert_eq!(report.lost_samples, 50);
        assert_eq!(report.dropouts.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(handle.frames(), 100);

        let marked = handle.dropouts();
        assert_eq!(marked.len(), 1);
        assert_relative_eq!(marked[0].0, 2.0);
        assert_relative_eq!(marked[0].1, 0.05);
    }

    #[test]
    fn test_monitoring_feeds_meters_without_a_token() {
        let (mut io, driver) = engine();
        let meter = Arc::new(LevelMeter::new(1));
        io.set_capture_meter(Some(meter.clone()));
        let options = StreamOptions {
            capture_channels: Some(1),
            ..options()
        };

        io.start_monitoring(&options).unwrap();
        assert!(io.is_monitoring());
        assert!(!io.is_busy());
        driver.fire_input(&[0.5, -0.25], 2, 0.0).unwrap();
        assert_relative_eq!(meter.peak(0), 0.5);

        io.start_stream(vec![ramp()], Vec::new(), 0.0, 1.0, &options).unwrap();
        assert!(!io.is_monitoring());
        assert_eq!(driver.requests().len(), 2);
    }

    #[test]
    fn test_rate_queries_go_through_the_catalog() {
        let (mut io, _driver) = engine();
        assert_eq!(io.best_rate(None, None, 44100).unwrap(), 44100);
        assert_eq!(io.optimal_rate(None, None).unwrap(), 44100);
        assert_eq!(io.devices().unwrap().len(), 1);
    }
}
