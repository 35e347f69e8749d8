use std::sync::{Arc, Mutex, MutexGuard};

use duplex_transport::{SampleFormat, StorageError, TrackStorage};

#[derive(Debug, Default)]
struct TrackData {
    samples: Vec<f32>,
    offset: f64,
    dropouts: Vec<(f64, f64)>,
    flushes: usize,
}

/// Capture storage that keeps every appended sample in memory.
///
/// The engine takes ownership of the track while recording; keep a
/// [`MemoryTrackHandle`] to inspect what arrived. A capacity can be set to
/// simulate a disk filling up mid-recording.
pub struct MemoryTrack {
    name: String,
    format: SampleFormat,
    rate: u32,
    capacity: Option<u64>,
    data: Arc<Mutex<TrackData>>,
}

impl MemoryTrack {
    pub fn new(name: impl Into<String>, rate: u32, format: SampleFormat) -> Self {
        Self {
            name: name.into(),
            format,
            rate,
            capacity: None,
            data: Arc::default(),
        }
    }

    /// Reject appends that would grow the track past `frames`.
    pub fn with_capacity_limit(mut self, frames: u64) -> Self {
        self.capacity = Some(frames);
        self
    }

    pub fn handle(&self) -> MemoryTrackHandle {
        MemoryTrackHandle {
            data: Arc::clone(&self.data),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackData> {
        lock_data(&self.data)
    }
}

fn lock_data(data: &Mutex<TrackData>) -> MutexGuard<'_, TrackData> {
    // A panic while holding the lock cannot leave the Vec half-written.
    data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TrackStorage for MemoryTrack {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_format(&self) -> SampleFormat {
        self.format
    }

    fn rate(&self) -> u32 {
        self.rate
    }

    fn append(&mut self, samples: &[f32]) -> Result<(), StorageError> {
        let capacity = self.capacity;
        let mut data = self.lock();
        if let Some(limit) = capacity {
            let stored = data.samples.len() as u64;
            if stored + samples.len() as u64 > limit {
                return Err(StorageError::Full { frames: stored });
            }
        }
        data.samples.extend_from_slice(samples);
        Ok(())
    }

    fn flush(&mut self) {
        self.lock().flushes += 1;
    }

    fn frames(&self) -> u64 {
        self.lock().samples.len() as u64
    }

    fn offset(&self) -> f64 {
        self.lock().offset
    }

    fn set_offset(&mut self, offset: f64) {
        self.lock().offset = offset;
    }

    fn mark_dropout(&mut self, start: f64, duration: f64) {
        self.lock().dropouts.push((start, duration));
    }
}

/// Read side of a [`MemoryTrack`] that stays with the caller.
#[derive(Clone)]
pub struct MemoryTrackHandle {
    data: Arc<Mutex<TrackData>>,
}

impl MemoryTrackHandle {
    pub fn samples(&self) -> Vec<f32> {
        lock_data(&self.data).samples.clone()
    }

    pub fn frames(&self) -> u64 {
        lock_data(&self.data).samples.len() as u64
    }

    pub fn offset(&self) -> f64 {
        lock_data(&self.data).offset
    }

    pub fn dropouts(&self) -> Vec<(f64, f64)> {
        lock_data(&self.data).dropouts.clone()
    }

    pub fn flush_count(&self) -> usize {
        lock_data(&self.data).flushes
    }
}
