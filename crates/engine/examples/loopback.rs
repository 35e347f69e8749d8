//! Plays three seconds of a 440 Hz tone on the default output while recording
//! the default input into a WAV file.
//!
//! cargo run -p duplex_engine --example loopback -- out.wav

use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use duplex_engine::{AudioIo, CpalDriver, LevelMeter, PlaybackTrack, StreamOptions};
use duplex_render::{ClipMixer, WavTrack};
use duplex_transport::{AudioArc, SampleFormat};

const SECONDS: f64 = 3.0;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let path = std::env::args().nth(1).unwrap_or_else(|| "loopback.wav".to_string());

    let mut io = AudioIo::new(Box::new(CpalDriver::new(None)?))?;
    let rate = io.best_rate(None, None, 44100)?;

    let tone = AudioArc::from_fn((rate as f64 * SECONDS) as usize, rate, 1, |frame, _| {
        (TAU * 440.0 * frame as f32 / rate as f32).sin() * 0.2
    });
    let playback = PlaybackTrack::new(ClipMixer::new(tone, rate)?);
    let recording = WavTrack::create(&path, rate, SampleFormat::Int16)?;

    let meter = Arc::new(LevelMeter::new(1));
    io.set_capture_meter(Some(meter.clone()));

    let options = StreamOptions {
        sample_rate: rate,
        capture_channels: Some(1),
        ..Default::default()
    };
    let token = io.start_stream(vec![playback], vec![Box::new(recording)], 0.0, SECONDS, &options)?;
    log::info!("stream {} running at {rate} Hz", token.get());

    while !io.stream_completed() && !io.recording_error() {
        std::thread::sleep(Duration::from_millis(250));
        io.collect_garbage();
        if let Some(time) = io.stream_time() {
            log::info!("{time:.2}s, input peak {:.3}", meter.peak(0));
        }
    }

    let Some(report) = io.stop_stream() else {
        anyhow::bail!("stream vanished before it was stopped");
    };
    for warning in &report.warnings {
        log::warn!("{warning}");
    }
    let frames: u64 = report.recorded.iter().map(|track| track.frames()).sum();
    log::info!(
        "recorded {frames} frames to {path} ({} samples lost, {} dropouts)",
        report.lost_samples,
        report.dropouts.len()
    );
    Ok(())
}
