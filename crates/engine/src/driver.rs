//! The contract between the engine and an audio hardware layer.
//!
//! A driver opens duplex (or one-sided) streams and invokes an
//! [`AudioCallback`] on its own thread with interleaved `f32` buffers.
//! [`crate::CpalDriver`] is the production implementation.

use std::time::Instant;

use crate::error::DriverError;

/// Status bits a driver attaches to a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(u8);

impl StatusFlags {
    pub const INPUT_UNDERFLOW: Self = Self(1);
    pub const INPUT_OVERFLOW: Self = Self(1 << 1);
    pub const OUTPUT_UNDERFLOW: Self = Self(1 << 2);
    pub const OUTPUT_OVERFLOW: Self = Self(1 << 3);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Timing and status of one callback. Times are seconds on the driver's
/// [`SystemClock`].
#[derive(Debug, Clone, Copy)]
pub struct CallbackInfo {
    pub system_time: f64,
    /// When the first output frame of this buffer reaches the DAC, if known.
    pub output_dac_time: Option<f64>,
    pub status: StatusFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Continue,
    /// End of the selection reached; the driver should wind the stream down.
    Complete,
    /// Stop immediately; the stream this callback belonged to is gone.
    Abort,
}

/// The function a driver calls for every hardware buffer.
///
/// `input` holds `frames * capture_channels` samples and `output` holds
/// `frames * playback_channels`, both interleaved. Implementations must not
/// block or allocate in steady state.
pub trait AudioCallback: Send + 'static {
    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        frames: usize,
        info: &CallbackInfo,
    ) -> CallbackResult;
}

/// Monotonic seconds since the driver was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    pub fn at(&self, instant: Instant) -> f64 {
        instant.saturating_duration_since(self.epoch).as_secs_f64()
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Device name; `None` selects the host default.
    pub device: Option<String>,
    pub channels: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub sample_rate: u32,
    pub frames_per_buffer: Option<u32>,
    pub playback: Option<ChannelSpec>,
    pub capture: Option<ChannelSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Playback,
    Capture,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub host: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub is_default_input: bool,
    pub is_default_output: bool,
}

/// Inclusive range of sample rates a device accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRange {
    pub min: u32,
    pub max: u32,
}

impl RateRange {
    pub fn contains(&self, rate: u32) -> bool {
        (self.min..=self.max).contains(&rate)
    }
}

/// An open hardware stream. Dropping it closes the stream.
pub trait DriverStream {
    fn start(&mut self) -> Result<(), DriverError>;

    /// Stop without draining queued output.
    fn abort(&mut self) -> Result<(), DriverError>;

    /// False once stopped, aborted, or wound down after a non-`Continue`
    /// callback result.
    fn is_active(&self) -> bool;
}

pub trait AudioDriver {
    fn clock(&self) -> SystemClock;

    fn devices(&self) -> Result<Vec<DeviceInfo>, DriverError>;

    /// Rate ranges `device` (or the default device) supports in `direction`.
    fn supported_rates(
        &self,
        device: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<RateRange>, DriverError>;

    fn open_stream(
        &self,
        request: &StreamRequest,
        callback: Box<dyn AudioCallback>,
    ) -> Result<Box<dyn DriverStream>, DriverError>;
}
