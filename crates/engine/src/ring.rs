//! Single-producer/single-consumer sample rings between the disk thread and
//! the hardware callback.
//!
//! The cursors live inside [`rtrb`], which publishes a write cursor only after
//! the samples behind it are visible (release on commit, acquire on read), so
//! neither side can observe a frame before its data. Each half is `Send` but
//! not `Clone`: the type system enforces one producer and one consumer.

use duplex_transport::SampleFormat;

use crate::error::AllocError;

pub struct RingBuffer;

impl RingBuffer {
    /// Allocate a ring of `capacity` frames of one channel.
    ///
    /// The allocation is probed with a fallible reservation first so that an
    /// oversized request surfaces as [`AllocError`] instead of aborting.
    pub fn try_new(
        capacity: usize,
        format: SampleFormat,
    ) -> Result<(RingProducer, RingConsumer), AllocError> {
        let mut probe: Vec<f32> = Vec::new();
        probe
            .try_reserve_exact(capacity)
            .map_err(|_| AllocError { frames: capacity })?;
        drop(probe);

        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        Ok((
            RingProducer {
                inner: producer,
                format,
            },
            RingConsumer { inner: consumer },
        ))
    }
}

/// Where the controller gets its rings from. Swappable so that allocation
/// failure can be exercised.
pub trait RingAllocator: Send + Sync {
    fn allocate(&self, frames: usize, format: SampleFormat) -> Result<(RingProducer, RingConsumer), AllocError>;
}

/// Allocates on the heap through [`RingBuffer::try_new`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapAllocator;

impl RingAllocator for HeapAllocator {
    fn allocate(&self, frames: usize, format: SampleFormat) -> Result<(RingProducer, RingConsumer), AllocError> {
        RingBuffer::try_new(frames, format)
    }
}

/// Write half of a ring.
pub struct RingProducer {
    inner: rtrb::Producer<f32>,
    format: SampleFormat,
}

impl RingProducer {
    pub fn capacity(&self) -> usize {
        self.inner.buffer().capacity()
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Free space in frames.
    #[inline]
    pub fn avail_for_put(&self) -> usize {
        self.inner.slots()
    }

    /// Copy as much of `data` as fits, quantized to the ring's sample format.
    /// Returns the number of frames written; never blocks.
    pub fn put(&mut self, data: &[f32]) -> usize {
        let count = data.len().min(self.inner.slots());
        if count == 0 {
            return 0;
        }
        let Ok(mut chunk) = self.inner.write_chunk(count) else {
            return 0;
        };
        let (first, second) = chunk.as_mut_slices();
        let (head, tail) = data[..count].split_at(first.len());
        if self.format.is_float() {
            first.copy_from_slice(head);
            second.copy_from_slice(tail);
        } else {
            for (dst, src) in first.iter_mut().chain(second.iter_mut()).zip(&data[..count]) {
                *dst = self.format.quantize(*src);
            }
        }
        chunk.commit_all();
        count
    }

    /// Write `data` followed by silence up to `total` frames, as far as the
    /// ring has room. Returns the frames written.
    pub fn put_padded(&mut self, data: &[f32], total: usize) -> usize {
        let written = self.put(&data[..data.len().min(total)]);
        if written < data.len().min(total) {
            return written;
        }
        written + self.put_silence(total - written)
    }

    pub fn put_silence(&mut self, count: usize) -> usize {
        let count = count.min(self.inner.slots());
        if count == 0 {
            return 0;
        }
        let Ok(mut chunk) = self.inner.write_chunk(count) else {
            return 0;
        };
        let (first, second) = chunk.as_mut_slices();
        first.fill(0.0);
        second.fill(0.0);
        chunk.commit_all();
        count
    }
}

/// Read half of a ring.
pub struct RingConsumer {
    inner: rtrb::Consumer<f32>,
}

impl RingConsumer {
    pub fn capacity(&self) -> usize {
        self.inner.buffer().capacity()
    }

    /// Filled space in frames.
    #[inline]
    pub fn avail_for_get(&self) -> usize {
        self.inner.slots()
    }

    /// Copy up to `dest.len()` frames out. Returns the frames copied; the rest
    /// of `dest` is left untouched.
    pub fn get(&mut self, dest: &mut [f32]) -> usize {
        let count = dest.len().min(self.inner.slots());
        if count == 0 {
            return 0;
        }
        let Ok(chunk) = self.inner.read_chunk(count) else {
            return 0;
        };
        let (first, second) = chunk.as_slices();
        dest[..first.len()].copy_from_slice(first);
        dest[first.len()..count].copy_from_slice(second);
        chunk.commit_all();
        count
    }

    /// Skip up to `count` frames without copying them.
    pub fn discard(&mut self, count: usize) -> usize {
        let count = count.min(self.inner.slots());
        if count == 0 {
            return 0;
        }
        match self.inner.read_chunk(count) {
            Ok(chunk) => {
                chunk.commit_all();
                count
            }
            Err(_) => 0,
        }
    }

    pub fn clear(&mut self) -> usize {
        self.discard(self.avail_for_get())
    }
}
