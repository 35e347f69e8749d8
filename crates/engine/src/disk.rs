//! The disk thread: mixes playback into the playback rings and drains the
//! capture rings into track storage.
//!
//! The thread lives as long as its [`crate::AudioIo`] and idles between
//! streams. It has two activation flags: `run_once` (one pass, then
//! acknowledge) and `loop_requested` (a pass every [`DISK_SLEEP`] until
//! cleared). A pending `run_once` is always serviced first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use duplex_transport::{Mixer, Resampler};

use crate::lockfree::{AtomicDouble, AtomicFlag};
use crate::options::{CaptureTrack, PlayMode};
use crate::ring::{RingConsumer, RingProducer};
use crate::state::StreamState;

pub const DISK_SLEEP: Duration = Duration::from_millis(10);

/// Frames of free playback space left unused to keep clear of the reader.
const SAFETY_FRAMES: usize = 10;

/// Flags shared by the controller, the disk thread and the callback.
#[derive(Debug, Default)]
pub(crate) struct DiskControl {
    pub run_once: AtomicFlag,
    /// Raised by the controller before the last pass of a stream so that
    /// resamplers emit their tail.
    pub final_drain: AtomicFlag,
    // The loop handshake is a store-then-load in both directions (requester
    // clears `loop_requested` then reads `loop_active`; the thread sets
    // `loop_active` then reads `loop_requested`), which needs SeqCst.
    loop_requested: AtomicBool,
    loop_active: AtomicBool,
    shutdown: AtomicFlag,
    pub recording_error: AtomicFlag,
    seek_pending: AtomicFlag,
    seek_target: AtomicDouble,
    passes: Mutex<u64>,
    pass_done: Condvar,
    thread: OnceLock<Thread>,
}

impl DiskControl {
    pub fn wake(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }

    pub fn request_loop(&self, on: bool) {
        self.loop_requested.store(on, Ordering::SeqCst);
        self.wake();
    }

    pub fn loop_active(&self) -> bool {
        self.loop_active.load(Ordering::SeqCst)
    }

    /// Ask the next pass to reposition the mixers to `time`.
    pub fn post_seek(&self, time: f64) {
        self.seek_target.set(time);
        self.seek_pending.set(true);
    }

    fn take_seek(&self) -> Option<f64> {
        self.seek_pending.swap(false).then(|| self.seek_target.get())
    }

    fn lock_passes(&self) -> MutexGuard<'_, u64> {
        self.passes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One playback track as the disk thread sees it.
pub(crate) struct PlaybackFeed {
    pub mixer: Box<dyn Mixer>,
    /// One ring per mixer channel.
    pub rings: Vec<RingProducer>,
}

/// One capture channel as the disk thread sees it.
pub(crate) struct CaptureSink {
    pub storage: CaptureTrack,
    pub ring: RingConsumer,
    pub resampler: Option<Box<dyn Resampler>>,
    scratch: Vec<f32>,
    resampled: Vec<f32>,
}

impl CaptureSink {
    pub fn new(storage: CaptureTrack, ring: RingConsumer, resampler: Option<Box<dyn Resampler>>) -> Self {
        Self {
            storage,
            ring,
            resampler,
            scratch: Vec::new(),
            resampled: Vec::new(),
        }
    }
}

/// Everything the disk thread touches during one stream.
pub(crate) struct DiskWork {
    pub playback: Vec<PlaybackFeed>,
    pub capture: Vec<CaptureSink>,
    state: Arc<StreamState>,
    rate: f64,
    t0: f64,
    t1: f64,
    mode: PlayMode,
    speed: f64,
    samples_to_copy: usize,
    min_capture_frames: usize,
    /// Frames produced since the start, the last loop restart or a seek.
    produced: u64,
    /// Track time of the next frame the mixers produce.
    position: f64,
}

impl DiskWork {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        playback: Vec<PlaybackFeed>,
        capture: Vec<CaptureSink>,
        state: Arc<StreamState>,
        rate: u32,
        t0: f64,
        t1: f64,
        mode: PlayMode,
        samples_to_copy: usize,
        min_capture_frames: usize,
    ) -> Self {
        let speed = state.speed.get().abs().max(f64::EPSILON);
        let mut work = Self {
            playback,
            capture,
            state,
            rate: rate as f64,
            t0,
            t1,
            mode,
            speed,
            samples_to_copy: samples_to_copy.max(1),
            min_capture_frames,
            produced: 0,
            position: t0,
        };
        for feed in &mut work.playback {
            feed.mixer.set_times_and_speed(t0, t1, speed);
        }
        work
    }

    fn direction(&self) -> f64 {
        if self.t1 < self.t0 { -1.0 } else { 1.0 }
    }

    /// Frames in one pass over the selection at the current speed.
    fn selection_frames(&self) -> u64 {
        ((self.t1 - self.t0).abs() / self.speed * self.rate).round() as u64
    }

    /// Frames left before the selection end (straight) or loop end (looped).
    fn frames_left(&self) -> Option<u64> {
        match self.mode {
            PlayMode::Interactive => None,
            PlayMode::Straight | PlayMode::Looped => {
                Some(self.selection_frames().saturating_sub(self.produced))
            }
        }
    }

    fn common_free_playback(&self) -> usize {
        self.playback
            .iter()
            .flat_map(|feed| feed.rings.iter())
            .map(RingProducer::avail_for_put)
            .min()
            .unwrap_or(0)
    }

    fn common_capture_available(&self) -> usize {
        self.capture
            .iter()
            .map(|sink| sink.ring.avail_for_get())
            .min()
            .unwrap_or(0)
    }

    pub fn seek(&mut self, time: f64) {
        log::debug!("disk thread repositioning to {time:.3}s");
        self.position = time;
        if self.mode != PlayMode::Interactive {
            let into = ((time - self.t0).abs() / self.speed * self.rate).round() as u64;
            self.produced = into.min(self.selection_frames());
        }
        for feed in &mut self.playback {
            feed.mixer.reposition(time);
        }
    }

    /// Pick up a live speed change while scrubbing.
    fn follow_speed(&mut self) {
        if self.mode != PlayMode::Interactive {
            return;
        }
        let speed = self.state.speed.get().abs().max(f64::EPSILON);
        if speed != self.speed {
            self.speed = speed;
            for feed in &mut self.playback {
                feed.mixer.set_times_and_speed(self.position, self.t1, speed);
            }
        }
    }

    pub fn fill_playback(&mut self) {
        if self.playback.is_empty() {
            return;
        }
        self.follow_speed();

        let free = self.common_free_playback();
        let available = free - free.min(SAFETY_FRAMES);
        let end_in_reach = self.mode == PlayMode::Straight
            && self
                .frames_left()
                .is_some_and(|left| available as u64 >= left);
        if available == 0 || (available < self.samples_to_copy && !end_in_reach) {
            return;
        }

        let mut budget = available;
        while budget > 0 {
            let mut chunk = budget.min(self.samples_to_copy);
            match (self.mode, self.frames_left()) {
                (PlayMode::Straight, Some(0)) => break,
                (PlayMode::Looped, Some(0)) => {
                    if self.produced == 0 {
                        // A loop with no length makes no progress.
                        break;
                    }
                    self.restart_loop();
                    continue;
                }
                (_, Some(left)) => chunk = chunk.min(left as usize),
                (_, None) => {}
            }
            self.mix(chunk);
            budget -= chunk;
        }
    }

    fn restart_loop(&mut self) {
        self.produced = 0;
        self.position = self.t0;
        for feed in &mut self.playback {
            feed.mixer.restart();
        }
    }

    fn mix(&mut self, frames: usize) {
        for feed in &mut self.playback {
            let produced = feed.mixer.process(frames);
            for (channel, ring) in feed.rings.iter_mut().enumerate() {
                let block = if produced > 0 {
                    &feed.mixer.buffer(channel)[..produced]
                } else {
                    &[]
                };
                ring.put_padded(block, frames);
            }
        }
        self.produced += frames as u64;
        self.position += self.direction() * frames as f64 / self.rate * self.speed;
    }

    /// Move captured audio into storage.
    ///
    /// `forced` drains whatever is there regardless of the minimum chunk;
    /// `last` also flushes resampler tails. Storage errors set the sticky
    /// `recording_error` and never propagate.
    pub fn drain_capture(&mut self, forced: bool, last: bool, recording_error: &AtomicFlag) {
        if self.capture.is_empty() || recording_error.get() {
            return;
        }
        let available = self.common_capture_available();
        if !forced && available < self.min_capture_frames.max(1) {
            return;
        }
        if available == 0 && !last {
            return;
        }

        for sink in &mut self.capture {
            if sink.scratch.len() < available {
                sink.scratch.resize(available, 0.0);
            }
            let got = sink.ring.get(&mut sink.scratch[..available]);

            let block: &[f32] = match sink.resampler.as_mut() {
                Some(resampler) => {
                    sink.resampled.clear();
                    if let Err(err) = resampler.process(&sink.scratch[..got], last, &mut sink.resampled) {
                        log::error!("resampling {} failed: {err}", sink.storage.name());
                        recording_error.set(true);
                        continue;
                    }
                    &sink.resampled
                }
                None => &sink.scratch[..got],
            };
            if block.is_empty() || recording_error.get() {
                continue;
            }
            if let Err(err) = sink.storage.append(block) {
                log::error!("recording to {} failed: {err}", sink.storage.name());
                recording_error.set(true);
            }
        }
    }
}

/// Handle to the persistent disk thread.
pub(crate) struct DiskThread {
    control: Arc<DiskControl>,
    work: Arc<Mutex<Option<DiskWork>>>,
    handle: Option<JoinHandle<()>>,
}

fn lock_work(work: &Mutex<Option<DiskWork>>) -> MutexGuard<'_, Option<DiskWork>> {
    work.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl DiskThread {
    pub fn spawn() -> std::io::Result<Self> {
        let control = Arc::new(DiskControl::default());
        let work = Arc::new(Mutex::new(None));

        let handle = {
            let control = Arc::clone(&control);
            let work = Arc::clone(&work);
            thread::Builder::new()
                .name("duplex-disk".into())
                .spawn(move || run(&control, &work))?
        };
        let _ = control.thread.set(handle.thread().clone());

        Ok(Self {
            control,
            work,
            handle: Some(handle),
        })
    }

    pub fn control(&self) -> &Arc<DiskControl> {
        &self.control
    }

    pub fn install(&self, work: DiskWork) {
        self.control.recording_error.set(false);
        self.control.final_drain.set(false);
        *lock_work(&self.work) = Some(work);
    }

    pub fn take_work(&self) -> Option<DiskWork> {
        lock_work(&self.work).take()
    }

    /// Run one pass on the disk thread and block until it is done.
    pub fn run_once_and_wait(&self) {
        let mut passes = self.control.lock_passes();
        let target = *passes + 1;
        self.control.run_once.set(true);
        self.control.wake();
        while *passes < target {
            if self.handle.as_ref().is_none_or(JoinHandle::is_finished) {
                log::error!("disk thread is gone; skipping pass");
                self.control.run_once.set(false);
                return;
            }
            passes = match self.control.pass_done.wait_timeout(passes, Duration::from_millis(50)) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn start_loop(&self) {
        self.control.request_loop(true);
    }

    /// Clear the loop request and wait until the thread has left the loop.
    pub fn stop_loop_and_wait(&self) {
        self.control.request_loop(false);
        while self.control.loop_active() {
            if self.handle.as_ref().is_none_or(JoinHandle::is_finished) {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for DiskThread {
    fn drop(&mut self) {
        self.control.shutdown.set(true);
        self.control.wake();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("disk thread panicked");
            }
        }
    }
}

fn run(control: &DiskControl, work: &Mutex<Option<DiskWork>>) {
    log::debug!("disk thread started");
    while !control.shutdown.get() {
        if control.run_once.get() {
            pass(control, work, true);
            control.run_once.set(false);
            *control.lock_passes() += 1;
            control.pass_done.notify_all();
            continue;
        }

        control.loop_active.store(true, Ordering::SeqCst);
        if control.loop_requested.load(Ordering::SeqCst) {
            pass(control, work, false);
        } else {
            control.loop_active.store(false, Ordering::SeqCst);
        }
        thread::park_timeout(DISK_SLEEP);
    }
    control.loop_active.store(false, Ordering::SeqCst);
    log::debug!("disk thread stopped");
}

fn pass(control: &DiskControl, work: &Mutex<Option<DiskWork>>, forced: bool) {
    let mut guard = lock_work(work);
    let Some(work) = guard.as_mut() else {
        return;
    };
    if let Some(time) = control.take_seek() {
        work.seek(time);
    }
    work.fill_playback();
    let last = forced && control.final_drain.get();
    work.drain_capture(forced, last, &control.recording_error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use duplex_render::{ClipMixer, MemoryTrack};
    use duplex_transport::{AudioArc, SampleFormat, SincStreamResampler};

    use crate::ring::RingBuffer;

    fn ramp_mixer(frames: usize, rate: u32) -> Box<dyn Mixer> {
        let source = AudioArc::from_fn(frames, rate, 1, |frame, _| frame as f32 / frames as f32);
        Box::new(ClipMixer::new(source, rate).unwrap())
    }

    fn playback_work(mode: PlayMode, t1: f64, ring_frames: usize, to_copy: usize) -> (DiskWork, RingConsumer) {
        let (tx, rx) = RingBuffer::try_new(ring_frames, SampleFormat::Float32).unwrap();
        let feed = PlaybackFeed {
            mixer: ramp_mixer(1000, 1000),
            rings: vec![tx],
        };
        let work = DiskWork::new(
            vec![feed],
            Vec::new(),
            Arc::default(),
            1000,
            0.0,
            t1,
            mode,
            to_copy,
            0,
        );
        (work, rx)
    }

    #[test]
    fn test_fill_waits_for_minimum_chunk() {
        let (mut work, mut rx) = playback_work(PlayMode::Straight, 1.0, 110, 50);

        work.fill_playback();
        assert_eq!(rx.avail_for_get(), 100);

        // 10 free minus the margin is below the chunk size.
        rx.discard(10);
        work.fill_playback();
        assert_eq!(rx.avail_for_get(), 90);
    }

    #[test]
    fn test_straight_fill_stops_at_selection_end() {
        let (mut work, rx) = playback_work(PlayMode::Straight, 0.05, 1000, 500);

        work.fill_playback();
        assert_eq!(rx.avail_for_get(), 50);
        assert_eq!(work.frames_left(), Some(0));
    }

    #[test]
    fn test_looped_fill_restarts_mixer() {
        let (mut work, mut rx) = playback_work(PlayMode::Looped, 0.02, 60, 10);

        work.fill_playback();

        let mut out = vec![0.0; 50];
        assert_eq!(rx.get(&mut out), 50);
        approx::assert_relative_eq!(out[0], 0.0);
        approx::assert_relative_eq!(out[19], 0.019, epsilon = 1e-4);
        approx::assert_relative_eq!(out[20], 0.0, epsilon = 1e-6);
        approx::assert_relative_eq!(out[41], 0.001, epsilon = 1e-4);
    }

    #[test]
    fn test_zero_length_loop_makes_no_progress() {
        let (mut work, rx) = playback_work(PlayMode::Looped, 0.0, 100, 10);
        work.fill_playback();
        assert_eq!(rx.avail_for_get(), 0);
    }

    #[test]
    fn test_seek_repositions_mixers() {
        let (mut work, mut rx) = playback_work(PlayMode::Straight, 1.0, 200, 10);
        work.seek(0.5);
        work.fill_playback();

        let mut out = [0.0; 1];
        rx.get(&mut out);
        approx::assert_relative_eq!(out[0], 0.5, epsilon = 1e-4);
        assert_eq!(work.frames_left(), Some(500 - 190));
    }

    fn capture_work(sinks: Vec<CaptureSink>, min_frames: usize) -> DiskWork {
        DiskWork::new(Vec::new(), sinks, Arc::default(), 1000, 0.0, 10.0, PlayMode::Straight, 100, min_frames)
    }

    #[test]
    fn test_drain_respects_minimum_unless_forced() {
        let (mut tx, rx) = RingBuffer::try_new(1000, SampleFormat::Float32).unwrap();
        let track = MemoryTrack::new("in", 1000, SampleFormat::Float32);
        let handle = track.handle();
        let mut work = capture_work(vec![CaptureSink::new(Box::new(track), rx, None)], 200);
        let error = AtomicFlag::default();

        tx.put(&[0.5; 150]);
        work.drain_capture(false, false, &error);
        assert_eq!(handle.frames(), 0);

        work.drain_capture(true, false, &error);
        assert_eq!(handle.frames(), 150);
        assert!(!error.get());
    }

    #[test]
    fn test_drain_takes_common_amount() {
        let (mut tx_a, rx_a) = RingBuffer::try_new(100, SampleFormat::Float32).unwrap();
        let (mut tx_b, rx_b) = RingBuffer::try_new(100, SampleFormat::Float32).unwrap();
        let a = MemoryTrack::new("a", 1000, SampleFormat::Float32);
        let b = MemoryTrack::new("b", 1000, SampleFormat::Float32);
        let (ha, hb) = (a.handle(), b.handle());
        let mut work = capture_work(
            vec![
                CaptureSink::new(Box::new(a), rx_a, None),
                CaptureSink::new(Box::new(b), rx_b, None),
            ],
            1,
        );

        tx_a.put(&[0.1; 30]);
        tx_b.put(&[0.2; 20]);
        work.drain_capture(false, false, &AtomicFlag::default());

        assert_eq!(ha.frames(), 20);
        assert_eq!(hb.frames(), 20);
    }

    #[test]
    fn test_storage_failure_is_sticky_and_keeps_earlier_samples() {
        let (mut tx, rx) = RingBuffer::try_new(1000, SampleFormat::Float32).unwrap();
        let track = MemoryTrack::new("in", 1000, SampleFormat::Float32).with_capacity_limit(150);
        let handle = track.handle();
        let mut work = capture_work(vec![CaptureSink::new(Box::new(track), rx, None)], 1);
        let error = AtomicFlag::default();

        tx.put(&[0.5; 100]);
        work.drain_capture(false, false, &error);
        tx.put(&[0.5; 100]);
        work.drain_capture(false, false, &error);

        assert!(error.get());
        assert_eq!(handle.frames(), 100);

        // Nothing more is drained once the error is raised.
        tx.put(&[0.5; 10]);
        work.drain_capture(true, true, &error);
        assert_eq!(work.common_capture_available(), 10);
    }

    #[test]
    fn test_final_drain_flushes_resampler() {
        let (mut tx, rx) = RingBuffer::try_new(10_000, SampleFormat::Float32).unwrap();
        let track = MemoryTrack::new("in", 48000, SampleFormat::Float32);
        let handle = track.handle();
        let resampler = SincStreamResampler::new(44100, 48000).unwrap();
        let mut work = DiskWork::new(
            Vec::new(),
            vec![CaptureSink::new(Box::new(track), rx, Some(Box::new(resampler)))],
            Arc::default(),
            44100,
            0.0,
            10.0,
            PlayMode::Straight,
            100,
            1,
        );
        let error = AtomicFlag::default();

        tx.put(&vec![0.25; 4410]);
        work.drain_capture(true, true, &error);

        assert!(!error.get());
        assert!(handle.frames() >= 4800);
    }

    #[test]
    fn test_thread_services_run_once() {
        let disk = DiskThread::spawn().unwrap();
        let (mut tx, rx) = RingBuffer::try_new(100, SampleFormat::Float32).unwrap();
        let track = MemoryTrack::new("in", 1000, SampleFormat::Float32);
        let handle = track.handle();
        disk.install(capture_work(vec![CaptureSink::new(Box::new(track), rx, None)], 1000));

        tx.put(&[0.5; 42]);
        disk.run_once_and_wait();

        assert_eq!(handle.frames(), 42);
        assert!(disk.take_work().is_some());
    }

    #[test]
    fn test_loop_can_be_stopped() {
        let disk = DiskThread::spawn().unwrap();
        let (work, rx) = playback_work(PlayMode::Looped, 0.5, 300, 50);
        disk.install(work);

        disk.start_loop();
        while rx.avail_for_get() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        disk.stop_loop_and_wait();

        assert!(!disk.control().loop_active());
        assert_eq!(rx.avail_for_get(), 290);
    }
}
