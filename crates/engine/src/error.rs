//! Error types for each control-thread boundary of the engine.
//!
//! Nothing here is ever produced on the hardware callback thread; the
//! callback reports through [`crate::CallbackResult`] and recorded dropouts.

use thiserror::Error;

/// Failures reported by an [`crate::AudioDriver`].
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("No audio devices found")]
    NoDevices,

    #[error("Audio host not found: {0}")]
    HostNotFound(String),

    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    Config(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuild(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlay(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("No sample rate supported by both devices")]
    NoSupportedRate,
}

/// A ring buffer of the requested size could not be allocated.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("failed to allocate a ring buffer of {frames} frames")]
pub struct AllocError {
    pub frames: usize,
}

/// Why [`crate::AudioIo::start_stream`] did not produce a token.
#[derive(Error, Debug)]
pub enum StartStreamError {
    /// Another stream owns the engine, or a concurrent start won the race.
    #[error("Audio engine is busy")]
    Busy,

    /// Buffer sizes were halved down to the floor without success.
    #[error("Out of memory!")]
    OutOfMemory,

    #[error("Error opening sound device.\nTry changing the audio host, playback device and the project sample rate.\n\n{0}")]
    Device(#[from] DriverError),

    #[error("Nothing to play or record")]
    NoTracks,

    #[error("Capture track {track} runs at {rate} Hz and cannot be resampled: {reason}")]
    Resampler {
        track: String,
        rate: u32,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_names_driver_error() {
        let err = StartStreamError::from(DriverError::StreamBuild("device busy".into()));
        let message = err.to_string();
        assert!(message.starts_with("Error opening sound device."));
        assert!(message.ends_with("Failed to build audio stream: device busy"));
    }

    #[test]
    fn test_out_of_memory_message() {
        assert_eq!(StartStreamError::OutOfMemory.to_string(), "Out of memory!");
    }
}
