//! Value types and collaborator contracts shared by the streaming core.
//!
//! The engine never decodes files, renders effects or writes a storage format
//! itself. It talks to those concerns through the traits in this crate:
//! [`Mixer`] produces playback blocks, [`TrackStorage`] receives captured
//! samples, [`Resampler`] converts captured audio to a track's native rate and
//! [`RealtimeEffects`] is the effect pipeline run inside the hardware callback.

mod effects;
mod format;
mod mixer;
mod resample;
mod storage;

use std::sync::Arc;

pub use effects::RealtimeEffects;
pub use format::SampleFormat;
pub use mixer::Mixer;
pub use resample::{ResampleError, Resampler, SincStreamResampler, resample_audio_arc};
pub use storage::{StorageError, TrackStorage};

/// Shared, immutable interleaved sample data for playback sources.
///
/// Cloning only bumps a reference count, so a source can be handed to a mixer
/// on the disk thread while the caller keeps its own copy.
///
/// ```
/// use duplex_transport::AudioArc;
///
/// let audio = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// assert_eq!(audio.frames(), 2);
/// assert_eq!(audio.sample(1, 0), 1.0);
/// ```
#[derive(Clone)]
pub struct AudioArc {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// # Panics
    ///
    /// Panics on zero channels or a sample count that is not a whole number
    /// of frames.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "an audio source needs at least one channel");
        assert!(
            samples.len() % channels as usize == 0,
            "{} samples do not divide into {channels} channels",
            samples.len()
        );
        Self {
            samples: Arc::from(samples),
            sample_rate,
            channels,
        }
    }

    /// Build a source by evaluating `f(frame, channel)` for every sample.
    pub fn from_fn(frames: usize, sample_rate: u32, channels: u16, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let samples = (0..frames)
            .flat_map(|frame| (0..channels as usize).map(move |channel| (frame, channel)))
            .map(|(frame, channel)| f(frame, channel))
            .collect();
        Self::new(samples, sample_rate, channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample at `frame` of `channel`; silence past the end. Channels beyond
    /// the source's wrap around, so a mono source feeds every output.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channels as usize;
        self.samples
            .get(frame * channels + channel % channels)
            .copied()
            .unwrap_or(0.0)
    }

    /// One channel, deinterleaved.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f32> + '_ {
        (0..self.frames()).map(move |frame| self.sample(frame, channel))
    }

    /// Convert to `rate`; shares the samples when the rate already matches.
    pub fn resample(&self, rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == rate {
            return Ok(self.clone());
        }
        resample_audio_arc(self, rate)
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AudioArc({} frames x {} ch @ {} Hz)",
            self.frames(),
            self.channels,
            self.sample_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "at least one channel")]
    fn test_zero_channels_panics() {
        AudioArc::new(vec![0.0], 44100, 0);
    }

    #[test]
    #[should_panic(expected = "do not divide")]
    fn test_partial_frame_panics() {
        AudioArc::new(vec![0.0; 5], 44100, 2);
    }

    #[test]
    fn test_mono_feeds_every_channel() {
        let audio = AudioArc::new(vec![0.25, 0.5], 8000, 1);
        assert_eq!(audio.sample(1, 0), 0.5);
        assert_eq!(audio.sample(1, 1), 0.5);
        assert_eq!(audio.sample(2, 0), 0.0);
    }

    #[test]
    fn test_from_fn_interleaves() {
        let audio = AudioArc::from_fn(3, 48000, 2, |frame, ch| (frame * 10 + ch) as f32);
        assert_eq!(audio.samples(), &[0.0, 1.0, 10.0, 11.0, 20.0, 21.0]);
        assert_eq!(audio.channel(1).collect::<Vec<_>>(), vec![1.0, 11.0, 21.0]);
    }

    #[test]
    fn test_resample_at_same_rate_shares_samples() {
        let audio = AudioArc::new(vec![0.0; 4410], 44100, 1);
        let same = audio.resample(44100).unwrap();
        assert!(std::ptr::eq(audio.samples().as_ptr(), same.samples().as_ptr()));
        assert_eq!(format!("{same:?}"), "AudioArc(4410 frames x 1 ch @ 44100 Hz)");
    }
}
