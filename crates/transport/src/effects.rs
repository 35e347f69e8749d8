/// The realtime effect pipeline.
///
/// Set-up calls (`initialize`, `add_processor`, `finalize`, `suspend`,
/// `resume`) come from the control thread; the `process*` calls come from the
/// hardware callback and must not block or allocate. Implementations own
/// whatever synchronization they need behind `&self`.
pub trait RealtimeEffects: Send + Sync {
    fn initialize(&self, rate: f64);

    /// Register the effect chain of playback `group` (one per track).
    fn add_processor(&self, group: usize, channels: usize, rate: f64);

    fn finalize(&self);

    fn suspend(&self);

    fn resume(&self);

    fn process_start(&self);

    /// Process `frames` frames of planar audio in place; `planar` holds
    /// `channels` consecutive runs of `frames` samples. Returns the frame
    /// count still valid afterwards.
    fn process(&self, group: usize, planar: &mut [f32], channels: usize, frames: usize) -> usize;

    fn process_end(&self);
}
