//! Concrete collaborators for the streaming core: a clip mixer for playback
//! and track storage for capture.

mod mixer;
mod track;
mod wav;

pub use mixer::ClipMixer;
pub use track::{MemoryTrack, MemoryTrackHandle};
pub use wav::WavTrack;
