//! [`AudioDriver`] on top of cpal.
//!
//! cpal opens input and output as separate streams. For duplex streams the
//! input side only queues samples into an rtrb ring; the engine callback runs
//! on the output thread, which pulls one buffer of input per call. A
//! capture-only stream runs the callback on the input thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, FromSample, Host, HostId, InputCallbackInfo, OutputCallbackInfo, Sample, SizedSample,
    StreamConfig, SupportedStreamConfigRange,
};

use crate::driver::{
    AudioCallback, AudioDriver, CallbackInfo, CallbackResult, DeviceInfo, Direction, DriverStream, RateRange,
    StatusFlags, StreamRequest, SystemClock,
};
use crate::error::DriverError;

/// Seconds of input the duplex queue holds between the two cpal threads.
const INPUT_QUEUE_SECS: f64 = 0.5;

fn host_name(id: HostId) -> String {
    let name = format!("{id:?}");
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        "Asio" => "ASIO".to_string(),
        _ => name,
    }
}

fn host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// Lower is preferred.
fn format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 4,
    }
}

pub struct CpalDriver {
    host: Host,
    clock: SystemClock,
}

impl CpalDriver {
    /// Open the named host (e.g. "ALSA", "JACK"), or the platform default.
    pub fn new(host: Option<&str>) -> Result<Self, DriverError> {
        let host = match host {
            Some(name) => host_by_name(name).ok_or_else(|| DriverError::HostNotFound(name.to_owned()))?,
            None => cpal::default_host(),
        };
        log::info!("using audio host {}", host_name(host.id()));
        Ok(Self {
            host,
            clock: SystemClock::new(),
        })
    }

    pub fn host_names() -> Vec<String> {
        cpal::available_hosts().into_iter().map(host_name).collect()
    }

    fn find_device(&self, name: Option<&str>, direction: Direction) -> Result<cpal::Device, DriverError> {
        let Some(name) = name else {
            let device = match direction {
                Direction::Playback => self.host.default_output_device(),
                Direction::Capture => self.host.default_input_device(),
            };
            return device.ok_or(DriverError::NoDevices);
        };

        let mut devices = match direction {
            Direction::Playback => self.host.output_devices(),
            Direction::Capture => self.host.input_devices(),
        }
        .map_err(|e| DriverError::Config(e.to_string()))?;
        devices
            .find(|device| device.name().is_ok_and(|device_name| device_name == name))
            .ok_or_else(|| DriverError::DeviceNotFound(name.to_owned()))
    }
}

fn config_ranges(device: &cpal::Device, direction: Direction) -> Result<Vec<SupportedStreamConfigRange>, DriverError> {
    let ranges: Result<Vec<SupportedStreamConfigRange>, _> = match direction {
        Direction::Playback => device.supported_output_configs().map(|configs| configs.collect()),
        Direction::Capture => device.supported_input_configs().map(|configs| configs.collect()),
    };
    ranges.map_err(|e| DriverError::Config(e.to_string()))
}

fn stream_config(
    device: &cpal::Device,
    direction: Direction,
    channels: u16,
    rate: u32,
    frames_per_buffer: Option<u32>,
) -> Result<(StreamConfig, cpal::SampleFormat), DriverError> {
    let sample_rate = cpal::SampleRate(rate);
    let format = config_ranges(device, direction)?
        .iter()
        .filter(|range| {
            range.channels() == channels
                && range.min_sample_rate() <= sample_rate
                && sample_rate <= range.max_sample_rate()
        })
        .map(SupportedStreamConfigRange::sample_format)
        .min_by_key(|format| format_rank(*format))
        .ok_or_else(|| DriverError::Config(format!("{channels} channels at {rate} Hz not supported")))?;

    let config = StreamConfig {
        channels,
        sample_rate,
        buffer_size: frames_per_buffer.map_or(BufferSize::Default, BufferSize::Fixed),
    };
    Ok((config, format))
}

impl AudioDriver for CpalDriver {
    fn clock(&self) -> SystemClock {
        self.clock
    }

    fn devices(&self) -> Result<Vec<DeviceInfo>, DriverError> {
        let host = host_name(self.host.id());
        let default_input = self.host.default_input_device().and_then(|d| d.name().ok());
        let default_output = self.host.default_output_device().and_then(|d| d.name().ok());

        let mut list = Vec::new();
        for device in self.host.devices().map_err(|e| DriverError::Config(e.to_string()))? {
            let Ok(name) = device.name() else {
                continue;
            };
            let max_channels = |direction| {
                config_ranges(&device, direction)
                    .map(|ranges| ranges.iter().map(|r| r.channels()).max().unwrap_or(0))
                    .unwrap_or(0)
            };
            list.push(DeviceInfo {
                is_default_input: default_input.as_deref() == Some(name.as_str()),
                is_default_output: default_output.as_deref() == Some(name.as_str()),
                max_input_channels: max_channels(Direction::Capture),
                max_output_channels: max_channels(Direction::Playback),
                host: host.clone(),
                name,
            });
        }
        log::debug!("found {} devices on {host}", list.len());
        Ok(list)
    }

    fn supported_rates(&self, device: Option<&str>, direction: Direction) -> Result<Vec<RateRange>, DriverError> {
        let device = match self.find_device(device, direction) {
            Ok(device) => device,
            // A missing default input just means no capture constraint.
            Err(DriverError::NoDevices) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        Ok(config_ranges(&device, direction)?
            .iter()
            .map(|range| RateRange {
                min: range.min_sample_rate().0,
                max: range.max_sample_rate().0,
            })
            .collect())
    }

    fn open_stream(
        &self,
        request: &StreamRequest,
        callback: Box<dyn AudioCallback>,
    ) -> Result<Box<dyn DriverStream>, DriverError> {
        let finished = Arc::new(AtomicBool::new(false));
        let mut streams = Vec::with_capacity(2);

        match (&request.playback, &request.capture) {
            (None, None) => return Err(DriverError::Config("stream has no channels".into())),
            (Some(playback), capture) => {
                let device = self.find_device(playback.device.as_deref(), Direction::Playback)?;
                let (config, format) = stream_config(
                    &device,
                    Direction::Playback,
                    playback.channels,
                    request.sample_rate,
                    request.frames_per_buffer,
                )?;

                let overflow = Arc::new(AtomicBool::new(false));
                let mut input = None;
                let mut input_channels = 0;
                if let Some(capture) = capture {
                    let in_device = self.find_device(capture.device.as_deref(), Direction::Capture)?;
                    let (in_config, in_format) = stream_config(
                        &in_device,
                        Direction::Capture,
                        capture.channels,
                        request.sample_rate,
                        request.frames_per_buffer,
                    )?;
                    let capacity =
                        (request.sample_rate as f64 * INPUT_QUEUE_SECS) as usize * capture.channels as usize;
                    let (tx, rx) = rtrb::RingBuffer::new(capacity.max(1));
                    let queue = InputQueue {
                        queue: tx,
                        overflow: Arc::clone(&overflow),
                    };
                    streams.push(build_input_queue(&in_device, &in_config, in_format, queue)?);
                    input = Some(rx);
                    input_channels = capture.channels as usize;
                }

                let frames_hint = request.frames_per_buffer.unwrap_or(1024) as usize;
                let side = OutputSide {
                    callback,
                    input,
                    overflow,
                    finished: Arc::clone(&finished),
                    clock: self.clock,
                    input_channels,
                    output_channels: playback.channels as usize,
                    input_scratch: vec![0.0; frames_hint * input_channels],
                    output_scratch: vec![0.0; frames_hint * playback.channels as usize],
                };
                streams.push(build_output(&device, &config, format, side)?);
            }
            (None, Some(capture)) => {
                let device = self.find_device(capture.device.as_deref(), Direction::Capture)?;
                let (config, format) = stream_config(
                    &device,
                    Direction::Capture,
                    capture.channels,
                    request.sample_rate,
                    request.frames_per_buffer,
                )?;
                let frames_hint = request.frames_per_buffer.unwrap_or(1024) as usize;
                let side = InputSide {
                    callback,
                    finished: Arc::clone(&finished),
                    clock: self.clock,
                    channels: capture.channels as usize,
                    scratch: vec![0.0; frames_hint * capture.channels as usize],
                };
                streams.push(build_input(&device, &config, format, side)?);
            }
        }

        log::info!(
            "opened stream at {} Hz ({} playback, {} capture channels)",
            request.sample_rate,
            request.playback.as_ref().map_or(0, |spec| spec.channels),
            request.capture.as_ref().map_or(0, |spec| spec.channels)
        );
        Ok(Box::new(CpalStream {
            streams,
            finished,
            started: false,
        }))
    }
}

/// Output-thread state of a stream with playback.
struct OutputSide {
    callback: Box<dyn AudioCallback>,
    input: Option<rtrb::Consumer<f32>>,
    overflow: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    clock: SystemClock,
    input_channels: usize,
    output_channels: usize,
    input_scratch: Vec<f32>,
    output_scratch: Vec<f32>,
}

impl OutputSide {
    fn render<T>(&mut self, data: &mut [T], info: &OutputCallbackInfo)
    where
        T: SizedSample + FromSample<f32>,
    {
        if self.finished.load(Ordering::Acquire) || self.output_channels == 0 {
            data.fill(<T as Sample>::EQUILIBRIUM);
            return;
        }
        let frames = data.len() / self.output_channels;
        let system_time = self.clock.now();
        let timestamp = info.timestamp();
        let output_dac_time = timestamp
            .playback
            .duration_since(&timestamp.callback)
            .map(|ahead| system_time + ahead.as_secs_f64());

        let mut status = StatusFlags::empty();
        if self.overflow.swap(false, Ordering::AcqRel) {
            status.insert(StatusFlags::INPUT_OVERFLOW);
        }

        let wanted = frames * self.input_channels;
        if self.input_scratch.len() < wanted {
            self.input_scratch.resize(wanted, 0.0);
        }
        if self.output_scratch.len() < data.len() {
            self.output_scratch.resize(data.len(), 0.0);
        }
        if let Some(queue) = self.input.as_mut() {
            let got = pop_into(queue, &mut self.input_scratch[..wanted]);
            if got < wanted {
                self.input_scratch[got..wanted].fill(0.0);
                status.insert(StatusFlags::INPUT_UNDERFLOW);
            }
        }

        let output = &mut self.output_scratch[..data.len()];
        let result = self.callback.process(
            &self.input_scratch[..wanted],
            output,
            frames,
            &CallbackInfo {
                system_time,
                output_dac_time,
                status,
            },
        );
        for (dest, sample) in data.iter_mut().zip(output.iter()) {
            *dest = T::from_sample(*sample);
        }
        if result != CallbackResult::Continue {
            self.finished.store(true, Ordering::Release);
        }
    }
}

/// Input-thread state of a capture-only stream.
struct InputSide {
    callback: Box<dyn AudioCallback>,
    finished: Arc<AtomicBool>,
    clock: SystemClock,
    channels: usize,
    scratch: Vec<f32>,
}

impl InputSide {
    fn capture<T>(&mut self, data: &[T], _info: &InputCallbackInfo)
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        if self.finished.load(Ordering::Acquire) || self.channels == 0 {
            return;
        }
        if self.scratch.len() < data.len() {
            self.scratch.resize(data.len(), 0.0);
        }
        let input = &mut self.scratch[..data.len()];
        for (dest, sample) in input.iter_mut().zip(data) {
            *dest = f32::from_sample(*sample);
        }

        let info = CallbackInfo {
            system_time: self.clock.now(),
            output_dac_time: None,
            status: StatusFlags::empty(),
        };
        let result = self.callback.process(input, &mut [], data.len() / self.channels, &info);
        if result != CallbackResult::Continue {
            self.finished.store(true, Ordering::Release);
        }
    }
}

/// Input-thread state of a duplex stream.
struct InputQueue {
    queue: rtrb::Producer<f32>,
    overflow: Arc<AtomicBool>,
}

impl InputQueue {
    fn push<T>(&mut self, data: &[T], _info: &InputCallbackInfo)
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let n = data.len().min(self.queue.slots());
        if let Ok(mut chunk) = self.queue.write_chunk(n) {
            let (first, second) = chunk.as_mut_slices();
            for (dest, sample) in first.iter_mut().chain(second.iter_mut()).zip(data) {
                *dest = f32::from_sample(*sample);
            }
            chunk.commit_all();
        }
        if n < data.len() {
            self.overflow.store(true, Ordering::Release);
        }
    }
}

fn pop_into(queue: &mut rtrb::Consumer<f32>, dest: &mut [f32]) -> usize {
    let n = dest.len().min(queue.slots());
    let Ok(chunk) = queue.read_chunk(n) else {
        return 0;
    };
    let (first, second) = chunk.as_slices();
    dest[..first.len()].copy_from_slice(first);
    dest[first.len()..n].copy_from_slice(second);
    chunk.commit_all();
    n
}

fn stream_error(err: cpal::StreamError) {
    log::error!("audio stream error: {err}");
}

fn build_output(
    device: &cpal::Device,
    config: &StreamConfig,
    format: cpal::SampleFormat,
    side: OutputSide,
) -> Result<cpal::Stream, DriverError> {
    fn build<T: SizedSample + FromSample<f32>>(
        device: &cpal::Device,
        config: &StreamConfig,
        mut side: OutputSide,
    ) -> Result<cpal::Stream, DriverError> {
        device
            .build_output_stream(
                config,
                move |data: &mut [T], info: &OutputCallbackInfo| side.render(data, info),
                stream_error,
                None,
            )
            .map_err(|e| DriverError::StreamBuild(e.to_string()))
    }

    match format {
        cpal::SampleFormat::F32 => build::<f32>(device, config, side),
        cpal::SampleFormat::I32 => build::<i32>(device, config, side),
        cpal::SampleFormat::I16 => build::<i16>(device, config, side),
        cpal::SampleFormat::U16 => build::<u16>(device, config, side),
        other => Err(DriverError::UnsupportedFormat(other.to_string())),
    }
}

fn build_input(
    device: &cpal::Device,
    config: &StreamConfig,
    format: cpal::SampleFormat,
    side: InputSide,
) -> Result<cpal::Stream, DriverError> {
    fn build<T>(device: &cpal::Device, config: &StreamConfig, mut side: InputSide) -> Result<cpal::Stream, DriverError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        device
            .build_input_stream(
                config,
                move |data: &[T], info: &InputCallbackInfo| side.capture(data, info),
                stream_error,
                None,
            )
            .map_err(|e| DriverError::StreamBuild(e.to_string()))
    }

    match format {
        cpal::SampleFormat::F32 => build::<f32>(device, config, side),
        cpal::SampleFormat::I32 => build::<i32>(device, config, side),
        cpal::SampleFormat::I16 => build::<i16>(device, config, side),
        cpal::SampleFormat::U16 => build::<u16>(device, config, side),
        other => Err(DriverError::UnsupportedFormat(other.to_string())),
    }
}

fn build_input_queue(
    device: &cpal::Device,
    config: &StreamConfig,
    format: cpal::SampleFormat,
    queue: InputQueue,
) -> Result<cpal::Stream, DriverError> {
    fn build<T>(device: &cpal::Device, config: &StreamConfig, mut queue: InputQueue) -> Result<cpal::Stream, DriverError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        device
            .build_input_stream(
                config,
                move |data: &[T], info: &InputCallbackInfo| queue.push(data, info),
                stream_error,
                None,
            )
            .map_err(|e| DriverError::StreamBuild(e.to_string()))
    }

    match format {
        cpal::SampleFormat::F32 => build::<f32>(device, config, queue),
        cpal::SampleFormat::I32 => build::<i32>(device, config, queue),
        cpal::SampleFormat::I16 => build::<i16>(device, config, queue),
        cpal::SampleFormat::U16 => build::<u16>(device, config, queue),
        other => Err(DriverError::UnsupportedFormat(other.to_string())),
    }
}

/// The cpal streams behind one engine stream. Dropping closes them.
struct CpalStream {
    streams: Vec<cpal::Stream>,
    finished: Arc<AtomicBool>,
    started: bool,
}

impl DriverStream for CpalStream {
    fn start(&mut self) -> Result<(), DriverError> {
        for stream in &self.streams {
            stream.play().map_err(|e| DriverError::StreamPlay(e.to_string()))?;
        }
        self.started = true;
        Ok(())
    }

    fn abort(&mut self) -> Result<(), DriverError> {
        self.finished.store(true, Ordering::Release);
        for stream in &self.streams {
            if let Err(err) = stream.pause() {
                log::debug!("pausing stream: {err}");
            }
        }
        self.started = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.started && !self.finished.load(Ordering::Acquire)
    }
}
