/// Produces resampled, gain-applied playback blocks for one track.
///
/// A mixer is owned by the disk thread for the lifetime of a stream. It is
/// asked for at most `max_frames` frames of *real time* at a time; speed and
/// direction warping happen inside it.
pub trait Mixer: Send {
    /// Number of planar output channels.
    fn channels(&self) -> usize;

    /// Produce up to `max_frames` frames; returns how many were produced.
    /// Fewer than requested means the selection end was reached.
    fn process(&mut self, max_frames: usize) -> usize;

    /// Planar output of the last [`Mixer::process`] call for `channel`.
    fn buffer(&self, channel: usize) -> &[f32];

    /// Jump to track time `time`.
    fn reposition(&mut self, time: f64);

    /// Rewind to the start of the selection (used by looped playback).
    fn restart(&mut self);

    fn set_times_and_speed(&mut self, t0: f64, t1: f64, speed: f64);
}
