//! Atomics shared between the control thread, the disk thread and the
//! hardware callback.

use std::sync::atomic::{AtomicBool, Ordering};

use atomic_float::{AtomicF32, AtomicF64};

/// Cache-line aligned atomic f32.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicFloat {
    value: AtomicF32,
}

impl AtomicFloat {
    pub fn new(value: f32) -> Self {
        Self {
            value: AtomicF32::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.value.store(value, Ordering::Release);
    }
}

impl Default for AtomicFloat {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Cache-line aligned atomic f64.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicDouble {
    value: AtomicF64,
}

impl AtomicDouble {
    pub fn new(value: f64) -> Self {
        Self {
            value: AtomicF64::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f64) {
        self.value.store(value, Ordering::Release);
    }
}

impl Default for AtomicDouble {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Cache-line aligned flag with acquire/release ordering.
///
/// A `set(true)` publishes every write made before it to the thread that
/// observes the flag with `get`.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    /// Returns the previous value.
    #[inline]
    pub fn swap(&self, value: bool) -> bool {
        self.value.swap(value, Ordering::AcqRel)
    }
}

/// A flag for store-then-load handshakes run from both sides, where each side
/// must see the other's store before its own load.
#[derive(Debug, Default)]
pub struct SeqCstFlag {
    value: AtomicBool,
}

impl SeqCstFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_flag_publishes_across_threads() {
        let flag = Arc::new(AtomicFlag::default());
        let value = Arc::new(AtomicDouble::default());

        let writer = {
            let flag = Arc::clone(&flag);
            let value = Arc::clone(&value);
            thread::spawn(move || {
                value.set(2.5);
                flag.set(true);
            })
        };
        writer.join().unwrap();

        assert!(flag.get());
        assert_eq!(value.get(), 2.5);
    }

    #[test]
    fn test_swap_returns_previous() {
        let flag = AtomicFlag::new(true);
        assert!(flag.swap(false));
        assert!(!flag.swap(false));
    }

    #[test]
    fn test_float_round_trip() {
        let level = AtomicFloat::new(0.5);
        level.set(-0.25);
        assert_eq!(level.get(), -0.25);
    }

    #[test]
    fn test_store_then_load_handshake_never_misses_both() {
        for _ in 0..1000 {
            let (ours, theirs) = (SeqCstFlag::default(), SeqCstFlag::default());
            let (we_saw, they_saw) = thread::scope(|s| {
                let a = s.spawn(|| {
                    ours.set(true);
                    theirs.get()
                });
                let b = s.spawn(|| {
                    theirs.set(true);
                    ours.get()
                });
                (a.join().unwrap(), b.join().unwrap())
            });
            assert!(we_saw || they_saw);
        }
    }
}
