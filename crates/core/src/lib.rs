//! Control-thread layer over [`duplex_engine`]: persisted audio preferences
//! and a session that runs playback, recording and monitoring from them.

pub mod preferences;
pub mod session;

pub use preferences::Preferences;
pub use session::{PlaybackState, Session};

pub use duplex_engine::{
    AudioIo, CaptureTrack, CpalDriver, MidiSync, PlayMode, PlaybackTrack, StopReport, StreamOptions, StreamToken,
};
pub use duplex_render::{ClipMixer, MemoryTrack, WavTrack};

/// Logs to stderr, `info` and up unless `RUST_LOG` says otherwise. Safe to
/// call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}
