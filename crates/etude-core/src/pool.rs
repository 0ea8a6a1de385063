//! Arena-style memory pool.
//!
//! Allocations are carved out of a fixed byte budget and are never returned
//! one by one. Everything is released at once with [`MemoryPool::reset`] or
//! when the pool is dropped. The pool does not hand out raw memory: callers
//! keep their data in ordinary Rust containers and charge the bytes here, so
//! an exhausted budget surfaces as [`Error::PoolExhausted`] before anything
//! is built.

use crate::compat::{AtomicUsize, Ordering};
use crate::{Error, Result};

/// Default allocation alignment in bytes.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// A region carved out of a [`MemoryPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    offset: usize,
    size: usize,
}

impl Allocation {
    /// Byte offset of the region inside the pool.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Aligned size of the region.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Bump-allocated byte budget shared between threads.
#[derive(Debug)]
pub struct MemoryPool {
    capacity: usize,
    alignment: usize,
    used: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicUsize,
}

impl MemoryPool {
    pub fn new(capacity: usize) -> Result<Self> {
        Self::with_alignment(capacity, DEFAULT_ALIGNMENT)
    }

    pub fn with_alignment(capacity: usize, alignment: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidSize(capacity));
        }
        if !alignment.is_power_of_two() {
            return Err(Error::InvalidAlignment(alignment));
        }
        Ok(Self {
            capacity,
            alignment,
            used: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
        })
    }

    /// Reserve a single region of `size` bytes.
    pub fn alloc(&self, size: usize) -> Result<Allocation> {
        let mut regions = self.alloc_many(&[size])?;
        regions.pop().ok_or(Error::InvalidSize(size))
    }

    /// Reserve several regions as one unit.
    ///
    /// Either every region is reserved or none is; on failure the pool is
    /// left exactly as it was.
    pub fn alloc_many(&self, sizes: &[usize]) -> Result<Vec<Allocation>> {
        let mut aligned = Vec::with_capacity(sizes.len());
        for &size in sizes {
            if size == 0 {
                return Err(Error::InvalidSize(size));
            }
            aligned.push(self.align(size).ok_or(Error::InvalidSize(size))?);
        }
        let total = aligned
            .iter()
            .try_fold(0usize, |acc, &size| acc.checked_add(size))
            .ok_or(Error::InvalidSize(usize::MAX))?;

        let mut start = self.used.load(Ordering::Acquire);
        loop {
            let available = self.capacity.saturating_sub(start);
            if total > available {
                return Err(Error::PoolExhausted {
                    requested: total,
                    available,
                });
            }
            match self.used.compare_exchange_weak(
                start,
                start + total,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => start = actual,
            }
        }

        self.peak.fetch_max(start + total, Ordering::AcqRel);
        self.allocations.fetch_add(aligned.len(), Ordering::AcqRel);

        let mut offset = start;
        Ok(aligned
            .into_iter()
            .map(|size| {
                let region = Allocation { offset, size };
                offset += size;
                region
            })
            .collect())
    }

    /// Release every allocation at once. The peak watermark is kept.
    pub fn reset(&self) {
        self.used.store(0, Ordering::Release);
        self.allocations.store(0, Ordering::Release);
    }

    pub fn reset_peak(&self) {
        self.peak
            .store(self.used.load(Ordering::Acquire), Ordering::Release);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    /// Highest `used()` value observed since creation or [`reset_peak`](Self::reset_peak).
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Acquire)
    }

    fn align(&self, size: usize) -> Option<usize> {
        let mask = self.alignment - 1;
        size.checked_add(mask).map(|s| s & !mask)
    }
}
