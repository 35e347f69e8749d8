//! Real-time duplex streaming core.
//!
//! Three threads cooperate per stream: the control thread that owns
//! [`AudioIo`], the disk thread that mixes playback and stores captured audio,
//! and the driver's hardware callback thread that moves samples between
//! single-producer/single-consumer rings and the device. The callback never
//! locks or allocates; everything it shares is an atomic, an rtrb queue or a
//! basedrop handle.

mod callback;
mod controller;
mod cpal_driver;
mod devices;
mod disk;
mod driver;
mod dropout;
mod error;
mod lockfree;
mod meter;
mod midi;
mod options;
mod ring;
mod state;
mod time;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use controller::{AudioIo, MIN_RING_FRAMES, NEGATIVE_START_WARNING, StopReport, StreamToken};
pub use cpal_driver::CpalDriver;
pub use devices::{DeviceCatalog, PREFERRED_RATE, STANDARD_RATES};
pub use disk::DISK_SLEEP;
pub use driver::{
    AudioCallback, AudioDriver, CallbackInfo, CallbackResult, ChannelSpec, DeviceInfo, Direction, DriverStream,
    RateRange, StatusFlags, StreamRequest, SystemClock,
};
pub use dropout::{Dropout, DropoutKind};
pub use error::{AllocError, DriverError, StartStreamError};
pub use lockfree::{AtomicDouble, AtomicFlag, AtomicFloat};
pub use meter::{LevelMeter, Meter};
pub use midi::MidiSync;
pub use options::{
    CaptureTrack, PlayMode, PlaybackTrack, RingSizing, SizingOverrides, StreamOptions, SyncMode, TrackControls,
};
pub use ring::{HeapAllocator, RingAllocator, RingBuffer, RingConsumer, RingProducer};
pub use state::PauseRequest;
pub use time::{LATENCY_LEARNING_CALLBACKS, MIDI_CLOCK_BIAS, SYNC_DECAY_RATE, SharedClock, SyncLine};
