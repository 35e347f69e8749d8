use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

use crate::lockfree::{AtomicDouble, AtomicFlag, AtomicFloat, SeqCstFlag};

/// A transport change the callback asks the control thread to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseRequest {
    Pause,
    Resume,
}

const NO_REQUEST: u8 = 0;
const PAUSE: u8 = 1;
const RESUME: u8 = 2;

/// Scalars shared by the controller and the hardware callback.
///
/// One instance lives as long as the [`crate::AudioIo`]; streams come and go
/// around it and are told apart by `token`.
#[derive(Debug)]
pub(crate) struct StreamState {
    /// 0: no stream, -1: a start is in progress, >0: the live stream.
    pub token: AtomicI64,
    pub paused: AtomicFlag,
    pub speed: AtomicDouble,
    pub seek_pending: AtomicFlag,
    pub seek_target: AtomicDouble,
    pub playthrough: AtomicFlag,
    pub emulate_output_volume: AtomicFlag,
    pub output_volume: AtomicFloat,
    pub meter_pre_volume: AtomicFlag,
    pub sound_activated: AtomicFlag,
    pub silence_level: AtomicFloat,
    pause_request: AtomicU8,
    // The stop sequence clears `meters_enabled` then reads the updating flags;
    // the callback sets an updating flag then reads `meters_enabled`.
    pub meters_enabled: SeqCstFlag,
    pub updating_capture_meter: SeqCstFlag,
    pub updating_playback_meter: SeqCstFlag,
    /// The callback returned `Complete` for the live stream.
    pub completed: AtomicFlag,
    pub lost_samples: Arc<AtomicU64>,
}

impl Default for StreamState {
    fn default() -> Self {
        Self {
            token: AtomicI64::new(0),
            paused: AtomicFlag::new(false),
            speed: AtomicDouble::new(1.0),
            seek_pending: AtomicFlag::new(false),
            seek_target: AtomicDouble::new(0.0),
            playthrough: AtomicFlag::new(false),
            emulate_output_volume: AtomicFlag::new(false),
            output_volume: AtomicFloat::new(1.0),
            meter_pre_volume: AtomicFlag::new(false),
            sound_activated: AtomicFlag::new(false),
            silence_level: AtomicFloat::new(0.0),
            pause_request: AtomicU8::new(NO_REQUEST),
            meters_enabled: SeqCstFlag::new(false),
            updating_capture_meter: SeqCstFlag::new(false),
            updating_playback_meter: SeqCstFlag::new(false),
            completed: AtomicFlag::new(false),
            lost_samples: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl StreamState {
    pub fn current_token(&self) -> i64 {
        self.token.load(Ordering::Acquire)
    }

    /// Post a request, replacing any the control thread has not seen yet.
    pub fn request(&self, request: PauseRequest) {
        let value = match request {
            PauseRequest::Pause => PAUSE,
            PauseRequest::Resume => RESUME,
        };
        self.pause_request.store(value, Ordering::Release);
    }

    pub fn pending_request(&self) -> Option<PauseRequest> {
        decode(self.pause_request.load(Ordering::Acquire))
    }

    pub fn take_request(&self) -> Option<PauseRequest> {
        decode(self.pause_request.swap(NO_REQUEST, Ordering::AcqRel))
    }

    pub fn lost_samples(&self) -> u64 {
        self.lost_samples.load(Ordering::Acquire)
    }
}

fn decode(value: u8) -> Option<PauseRequest> {
    match value {
        PAUSE => Some(PauseRequest::Pause),
        RESUME => Some(PauseRequest::Resume),
        _ => None,
    }
}
