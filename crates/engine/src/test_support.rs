//! Deterministic stand-ins for the hardware layer.
//!
//! [`FakeDriver`] never touches a device: the test drives the installed
//! callback by hand with [`FakeDriver::fire`], on its own thread, with exactly
//! the buffers and timestamps it wants.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use duplex_transport::SampleFormat;

use crate::driver::{
    AudioCallback, AudioDriver, CallbackInfo, CallbackResult, DeviceInfo, Direction, DriverStream, RateRange,
    StatusFlags, StreamRequest, SystemClock,
};
use crate::error::{AllocError, DriverError};
use crate::ring::{HeapAllocator, RingAllocator, RingConsumer, RingProducer};

struct FakeState {
    callback: Option<Box<dyn AudioCallback>>,
    /// Identifies the stream that owns `callback`.
    generation: u64,
    request: Option<StreamRequest>,
    requests: Vec<StreamRequest>,
    active: bool,
    fail_open: Option<String>,
    playback_rates: Vec<RateRange>,
    capture_rates: Vec<RateRange>,
    devices: Vec<DeviceInfo>,
    /// Seconds of audio fired so far; used as the callback system time.
    elapsed: f64,
}

/// A driver whose callback runs only when the test calls [`FakeDriver::fire`].
///
/// Clones share state, so a test keeps one clone and hands another to
/// [`crate::AudioIo`].
#[derive(Clone)]
pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
    clock: SystemClock,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        let full_range = vec![RateRange { min: 8000, max: 192_000 }];
        Self {
            state: Arc::new(Mutex::new(FakeState {
                callback: None,
                generation: 0,
                request: None,
                requests: Vec::new(),
                active: false,
                fail_open: None,
                playback_rates: full_range.clone(),
                capture_rates: full_range,
                devices: vec![DeviceInfo {
                    name: "Fake Duplex".into(),
                    host: "Fake".into(),
                    max_input_channels: 8,
                    max_output_channels: 8,
                    is_default_input: true,
                    is_default_output: true,
                }],
                elapsed: 0.0,
            })),
            clock: SystemClock::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_rates(&self, direction: Direction, rates: Vec<RateRange>) {
        let mut state = self.lock();
        match direction {
            Direction::Playback => state.playback_rates = rates,
            Direction::Capture => state.capture_rates = rates,
        }
    }

    /// Make the next `open_stream` calls fail with `message`.
    pub fn fail_open(&self, message: Option<&str>) {
        self.lock().fail_open = message.map(str::to_owned);
    }

    /// Every request passed to `open_stream`, in order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.lock().requests.clone()
    }

    pub fn has_stream(&self) -> bool {
        self.lock().callback.is_some()
    }

    pub fn is_running(&self) -> bool {
        let state = self.lock();
        state.callback.is_some() && state.active
    }

    /// Invoke the installed callback once with `input` (interleaved) and
    /// return what it wrote. `None` if no stream is open.
    pub fn fire_with(
        &self,
        input: &[f32],
        frames: usize,
        info: CallbackInfo,
    ) -> Option<(CallbackResult, Vec<f32>)> {
        let (mut callback, generation, output_channels) = {
            let mut state = self.lock();
            let callback = state.callback.take()?;
            let channels = state
                .request
                .as_ref()
                .and_then(|request| request.playback.as_ref())
                .map_or(0, |spec| spec.channels as usize);
            (callback, state.generation, channels)
        };

        let mut output = vec![0.0; frames * output_channels];
        let result = callback.process(input, &mut output, frames, &info);

        let mut state = self.lock();
        if state.generation == generation {
            state.callback = Some(callback);
            if result != CallbackResult::Continue {
                state.active = false;
            }
        }
        Some((result, output))
    }

    /// Fire with silence on every input channel and a system time that
    /// advances in step with the audio.
    pub fn fire(&self, frames: usize) -> Option<(CallbackResult, Vec<f32>)> {
        let (input_channels, rate, system_time) = {
            let state = self.lock();
            let request = state.request.as_ref()?;
            let channels = request.capture.as_ref().map_or(0, |spec| spec.channels as usize);
            (channels, request.sample_rate, state.elapsed)
        };
        let input = vec![0.0; frames * input_channels];
        let result = self.fire_input(&input, frames, system_time);
        self.lock().elapsed += frames as f64 / rate as f64;
        result
    }

    /// Fire with the given interleaved input.
    pub fn fire_input(&self, input: &[f32], frames: usize, system_time: f64) -> Option<(CallbackResult, Vec<f32>)> {
        self.fire_with(
            input,
            frames,
            CallbackInfo {
                system_time,
                output_dac_time: None,
                status: StatusFlags::empty(),
            },
        )
    }
}

impl AudioDriver for FakeDriver {
    fn clock(&self) -> SystemClock {
        self.clock
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, DriverError> {
        Ok(self.lock().devices.clone())
    }

    fn supported_rates(&self, _device: Option<&str>, direction: Direction) -> Result<Vec<RateRange>, DriverError> {
        let state = self.lock();
        Ok(match direction {
            Direction::Playback => state.playback_rates.clone(),
            Direction::Capture => state.capture_rates.clone(),
        })
    }

    fn open_stream(
        &self,
        request: &StreamRequest,
        callback: Box<dyn AudioCallback>,
    ) -> Result<Box<dyn DriverStream>, DriverError> {
        let mut state = self.lock();
        state.requests.push(request.clone());
        if let Some(message) = state.fail_open.clone() {
            return Err(DriverError::StreamBuild(message));
        }
        state.generation += 1;
        state.callback = Some(callback);
        state.request = Some(request.clone());
        state.active = false;
        state.elapsed = 0.0;
        Ok(Box::new(FakeStream {
            state: Arc::clone(&self.state),
            generation: state.generation,
        }))
    }
}

struct FakeStream {
    state: Arc<Mutex<FakeState>>,
    generation: u64,
}

impl FakeStream {
    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> Option<R> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        (state.generation == self.generation).then(|| f(&mut state))
    }
}

impl DriverStream for FakeStream {
    fn start(&mut self) -> Result<(), DriverError> {
        self.with_state(|state| state.active = true);
        Ok(())
    }

    fn abort(&mut self) -> Result<(), DriverError> {
        self.with_state(|state| state.active = false);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.with_state(|state| state.active).unwrap_or(false)
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.with_state(|state| {
            state.callback = None;
            state.request = None;
            state.active = false;
        });
    }
}

/// Allocator that refuses the first `failures` requests, or every request
/// above a size, and remembers what it was asked for.
#[derive(Default)]
pub struct ScriptedAllocator {
    failures: AtomicUsize,
    fail_above: Option<usize>,
    always_fail: bool,
    requests: Mutex<Vec<usize>>,
}

impl ScriptedAllocator {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    pub fn failing_above(frames: usize) -> Self {
        Self {
            fail_above: Some(frames),
            ..Default::default()
        }
    }

    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Default::default()
        }
    }

    /// Frame counts of every allocation attempted so far.
    pub fn requests(&self) -> Vec<usize> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl RingAllocator for ScriptedAllocator {
    fn allocate(&self, frames: usize, format: SampleFormat) -> Result<(RingProducer, RingConsumer), AllocError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(frames);

        let scripted_failure = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1))
            .is_ok();
        let too_large = self.fail_above.is_some_and(|limit| frames > limit);
        if self.always_fail || scripted_failure || too_large {
            return Err(AllocError { frames });
        }
        HeapAllocator.allocate(frames, format)
    }
}
