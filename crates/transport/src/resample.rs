use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};

use crate::AudioArc;

/// Frames fed to the sinc resampler per step on the capture path.
const STREAM_CHUNK_FRAMES: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ResampleError {
    #[error("failed to build resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Streaming rate converter for one captured channel.
///
/// Input arrives in arbitrary block sizes from the disk thread; output is
/// appended to `output`. Passing `last = true` flushes any frames the
/// converter is still holding so nothing is lost at the end of a recording.
pub trait Resampler: Send {
    /// Output rate divided by input rate.
    fn ratio(&self) -> f64;

    /// Returns the number of frames appended to `output`.
    fn process(
        &mut self,
        input: &[f32],
        last: bool,
        output: &mut Vec<f32>,
    ) -> Result<usize, ResampleError>;
}

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Mono [`Resampler`] on top of rubato's fixed-input sinc converter.
pub struct SincStreamResampler {
    inner: SincFixedIn<f32>,
    pending: Vec<f32>,
    ratio: f64,
}

impl SincStreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Result<Self, ResampleError> {
        let ratio = to_rate as f64 / from_rate as f64;
        let inner = SincFixedIn::<f32>::new(ratio, 1.0, sinc_parameters(), STREAM_CHUNK_FRAMES, 1)?;
        Ok(Self {
            inner,
            pending: Vec::with_capacity(STREAM_CHUNK_FRAMES * 2),
            ratio,
        })
    }
}

impl Resampler for SincStreamResampler {
    fn ratio(&self) -> f64 {
        self.ratio
    }

    fn process(
        &mut self,
        input: &[f32],
        last: bool,
        output: &mut Vec<f32>,
    ) -> Result<usize, ResampleError> {
        self.pending.extend_from_slice(input);
        let before = output.len();

        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let block = self.inner.process(&[&self.pending[..needed]], None)?;
            output.extend_from_slice(&block[0]);
            self.pending.drain(..needed);
        }

        if last {
            if !self.pending.is_empty() {
                let block = self
                    .inner
                    .process_partial(Some(&[&self.pending[..]]), None)?;
                output.extend_from_slice(&block[0]);
                self.pending.clear();
            }
            // Drain the filter delay line.
            let tail = self.inner.process_partial(None::<&[Vec<f32>]>, None)?;
            output.extend_from_slice(&tail[0]);
            self.inner.reset();
        }

        Ok(output.len() - before)
    }
}

/// Resample a whole in-memory source, e.g. before handing it to a mixer.
pub fn resample_audio_arc(audio: &AudioArc, target_sample_rate: u32) -> anyhow::Result<AudioArc> {
    if audio.sample_rate() == target_sample_rate {
        return Ok(audio.clone());
    }

    let channels = audio.channels() as usize;
    let input_frames = audio.frames();
    let resample_ratio = target_sample_rate as f64 / audio.sample_rate() as f64;

    let input_channels: Vec<Vec<f32>> = (0..channels)
        .map(|ch| audio.channel(ch).collect())
        .collect();

    let mut resampler = SincFixedIn::<f32>::new(
        resample_ratio,
        2.0,
        sinc_parameters(),
        input_frames.max(1),
        channels,
    )?;
    let output_channels = if input_frames == 0 {
        vec![Vec::new(); channels]
    } else {
        resampler.process(&input_channels, None)?
    };

    let output_frames = output_channels[0].len();
    let mut output_samples = Vec::with_capacity(output_frames * channels);
    for frame_idx in 0..output_frames {
        for channel in &output_channels {
            output_samples.push(channel[frame_idx]);
        }
    }

    Ok(AudioArc::new(
        output_samples,
        target_sample_rate,
        audio.channels(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(frequency: f32, sample_rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * PI * frequency * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_stream_resampler_ratio() {
        let resampler = SincStreamResampler::new(48000, 44100).unwrap();
        approx::assert_relative_eq!(resampler.ratio(), 44100.0 / 48000.0);
    }

    #[test]
    fn test_stream_resampler_holds_partial_chunks() {
        let mut resampler = SincStreamResampler::new(44100, 48000).unwrap();
        let mut out = Vec::new();

        let produced = resampler.process(&sine(440.0, 44100, 100), false, &mut out).unwrap();

        assert_eq!(produced, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_stream_resampler_flush_emits_everything() {
        let input = sine(440.0, 44100, 4410);
        let mut resampler = SincStreamResampler::new(44100, 48000).unwrap();
        let mut out = Vec::new();

        for block in input.chunks(333) {
            resampler.process(block, false, &mut out).unwrap();
        }
        resampler.process(&[], true, &mut out).unwrap();

        // The flush includes the filter tail, so at least the scaled length comes out.
        let expected = (input.len() as f64 * 48000.0 / 44100.0) as usize;
        assert!(out.len() >= expected, "got {} expected >= {}", out.len(), expected);
    }

    #[test]
    fn test_resample_audio_arc_upsampling() {
        let audio = AudioArc::new(sine(440.0, 44100, 4410), 44100, 1);
        let resampled = resample_audio_arc(&audio, 48000).unwrap();

        assert_eq!(resampled.sample_rate(), 48000);
        let expected = (audio.frames() as f64 * 48000.0 / 44100.0) as i64;
        let tolerance = (expected as f64 * 0.03) as i64;
        assert!((resampled.frames() as i64 - expected).abs() <= tolerance);
    }

    #[test]
    fn test_resample_audio_arc_empty() {
        let audio = AudioArc::new(Vec::new(), 44100, 2);
        let resampled = resample_audio_arc(&audio, 48000).unwrap();
        assert_eq!(resampled.frames(), 0);
        assert_eq!(resampled.channels(), 2);
    }
}
