use crate::SampleFormat;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage is full after {frames} frames")]
    Full { frames: u64 },

    #[error("failed to encode samples: {0}")]
    Encode(String),
}

/// Persistent destination of one captured channel.
///
/// `append` has the strong guarantee: on error nothing from that call is
/// stored, and everything appended earlier stays durable. `flush` must not
/// fail; implementations log and swallow their own errors.
pub trait TrackStorage: Send {
    fn name(&self) -> &str;

    fn sample_format(&self) -> SampleFormat;

    /// Native rate of the track; captured audio is resampled to it.
    fn rate(&self) -> u32;

    fn append(&mut self, samples: &[f32]) -> Result<(), StorageError>;

    fn flush(&mut self);

    /// Frames stored so far.
    fn frames(&self) -> u64;

    /// Track time of the first stored frame.
    fn offset(&self) -> f64;

    fn set_offset(&mut self, offset: f64);

    fn end_time(&self) -> f64 {
        self.offset() + self.frames() as f64 / self.rate() as f64
    }

    /// Mark a region that lost input during capture.
    fn mark_dropout(&mut self, _start: f64, _duration: f64) {}
}
