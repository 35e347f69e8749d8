use std::sync::atomic::{AtomicU64, Ordering};

/// Which side of the stream lost audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropoutKind {
    /// Input frames that could not be queued for the disk thread, or that the
    /// driver reported lost to an input overflow.
    Capture,
    /// The device ran out of output.
    Playback,
}

/// One gap, in track time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    pub kind: DropoutKind,
    pub start: f64,
    pub duration: f64,
}

/// Queue sizing: enough for minutes of continuous trouble before the oldest
/// intervals are lost. The lost-sample count is kept separately and is exact.
pub(crate) const DROPOUT_QUEUE_CAPACITY: usize = 4096;

/// Callback side of the dropout record.
pub(crate) struct DropoutRecorder {
    queue: rtrb::Producer<Dropout>,
    lost: std::sync::Arc<AtomicU64>,
}

impl DropoutRecorder {
    pub(crate) fn new(queue: rtrb::Producer<Dropout>, lost: std::sync::Arc<AtomicU64>) -> Self {
        Self { queue, lost }
    }

    pub(crate) fn record(&mut self, dropout: Dropout, lost_frames: u64) {
        if lost_frames > 0 {
            self.lost.fetch_add(lost_frames, Ordering::AcqRel);
        }
        // A full queue only loses the interval, never blocks.
        let _ = self.queue.push(dropout);
    }
}

/// Control side: accumulates intervals drained from the callback.
#[derive(Default)]
pub(crate) struct DropoutLog {
    queue: Option<rtrb::Consumer<Dropout>>,
    entries: Vec<Dropout>,
}

impl DropoutLog {
    pub(crate) fn attach(&mut self, queue: rtrb::Consumer<Dropout>) {
        self.queue = Some(queue);
        self.entries.clear();
    }

    pub(crate) fn drain(&mut self) {
        if let Some(queue) = self.queue.as_mut() {
            while let Ok(dropout) = queue.pop() {
                self.entries.push(dropout);
            }
        }
    }

    /// Detach from the stream and hand back everything recorded.
    pub(crate) fn finish(&mut self) -> Vec<Dropout> {
        self.drain();
        self.queue = None;
        std::mem::take(&mut self.entries)
    }
}
