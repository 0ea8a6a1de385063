//! Lock-free primitives shared between a controlling thread and workers.

use crate::compat::{AtomicBool, Ordering};
use atomic_float::{AtomicF32, AtomicF64};
use std::time::Duration;

/// Cache-line aligned atomic bool.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub const fn new(value: bool) -> Self {
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

    /// Stores `value` and returns the previous value.
    #[inline]
    pub fn swap(&self, value: bool) -> bool {
        self.value.swap(value, Ordering::AcqRel)
    }
}

/// Progress fraction in `0.0..=1.0`.
///
/// Writers can either overwrite the value or [`advance`](Self::advance) it,
/// which never moves backwards even when several threads race.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicProgress {
    value: AtomicF32,
}

impl AtomicProgress {
    pub fn new(value: f32) -> Self {
        Self {
            value: AtomicF32::new(value.clamp(0.0, 1.0)),
        }
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: f32) {
        self.value.store(value.clamp(0.0, 1.0), Ordering::Release);
    }

    /// Raises the stored value to `value` if it is larger. Returns the value now stored.
    pub fn advance(&self, value: f32) -> f32 {
        let target = value.clamp(0.0, 1.0);
        let mut current = self.value.load(Ordering::Acquire);
        while target > current {
            match self.value.compare_exchange_weak(
                current,
                target,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return target,
                Err(actual) => current = actual,
            }
        }
        current
    }
}

impl Default for AtomicProgress {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Accumulated wall time in seconds.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicSeconds {
    value: AtomicF64,
}

impl AtomicSeconds {
    pub fn new(seconds: f64) -> Self {
        Self {
            value: AtomicF64::new(seconds),
        }
    }

    #[inline]
    pub fn get(&self) -> f64 {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, seconds: f64) {
        self.value.store(seconds, Ordering::Release);
    }

    #[inline]
    pub fn add(&self, elapsed: Duration) {
        self.value
            .fetch_add(elapsed.as_secs_f64(), Ordering::AcqRel);
    }

    #[inline]
    pub fn reset(&self) {
        self.set(0.0);
    }
}

impl Default for AtomicSeconds {
    fn default() -> Self {
        Self::new(0.0)
    }
}
