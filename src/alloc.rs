//! Bounded byte allocation for decoded pixel data.
//!
//! Every pixel buffer the pipeline produces is accounted against one global
//! `MemoryBudget`. A reservation that would exceed the cap is not an error:
//! callers back off, or better, steal a pending unit of work and run it on
//! their own thread (`StealingReserver`), since finishing someone else's
//! decode is often exactly what frees the memory being waited on. This breaks
//! the deadlock where every pool worker is blocked on memory that only a
//! yet-to-run worker task would release.

use crate::error::{Error, Result};
use crate::pool::PriorityPool;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Global byte budget tracked with an atomic running total.
pub struct MemoryBudget {
    total: usize,
    used: AtomicUsize,
}

impl MemoryBudget {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            used: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn available(&self) -> usize {
        self.total.saturating_sub(self.used())
    }

    /// Try to reserve bytes. Returns false once the cap would be exceeded.
    pub fn try_reserve(&self, bytes: usize) -> bool {
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            if current + bytes > self.total {
                return false;
            }
            match self.used.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(x) => current = x,
            }
        }
    }

    /// Return previously reserved bytes to the budget.
    pub fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::SeqCst);
    }

    /// Reserve bytes as a RAII guard, or `None` when over budget.
    pub fn reserve(self: &Arc<Self>, bytes: usize) -> Option<Reservation> {
        if self.try_reserve(bytes) {
            Some(Reservation {
                budget: Arc::clone(self),
                bytes,
            })
        } else {
            None
        }
    }
}

/// A successful reservation. Releases its bytes on drop unless converted
/// into a [`PixelBuf`].
pub struct Reservation {
    budget: Arc<MemoryBudget>,
    bytes: usize,
}

impl Reservation {
    #[inline]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Attach decoded pixels to this reservation. The bytes stay reserved
    /// until the buffer's last reference is dropped.
    pub fn into_buf(mut self, pixels: Vec<u8>, width: u32, height: u32) -> PixelBuf {
        let reserved = self.bytes;
        self.bytes = 0; // disarm the drop release; the buffer owns it now
        PixelBuf {
            pixels,
            width,
            height,
            budget: Arc::clone(&self.budget),
            reserved,
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.budget.release(self.bytes);
        }
    }
}

/// A decoded RGBA pixel buffer carrying its budget reservation.
///
/// Shared along the provider chain as `Arc<PixelBuf>`; the reservation is
/// returned to the budget exactly once, when the last reference drops.
pub struct PixelBuf {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    budget: Arc<MemoryBudget>,
    reserved: usize,
}

impl PixelBuf {
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes reserved against the budget for this buffer.
    #[inline]
    pub fn reserved(&self) -> usize {
        self.reserved
    }
}

impl Drop for PixelBuf {
    fn drop(&mut self) {
        self.budget.release(self.reserved);
    }
}

impl fmt::Debug for PixelBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuf")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("reserved", &self.reserved)
            .finish()
    }
}

/// Work-stealing decorator over the budget.
///
/// On a blocked reservation it pops one pending unit from the pool and runs
/// it on the calling thread, then retries; with nothing to steal it sleeps a
/// short fixed backoff. Only a request larger than the whole cap fails
/// permanently.
#[derive(Clone)]
pub struct StealingReserver {
    budget: Arc<MemoryBudget>,
    pool: Arc<PriorityPool>,
    backoff: Duration,
}

impl StealingReserver {
    pub fn new(budget: Arc<MemoryBudget>, pool: Arc<PriorityPool>, backoff: Duration) -> Self {
        Self {
            budget,
            pool,
            backoff,
        }
    }

    #[inline]
    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }

    /// Reserve bytes, stealing pending work while blocked.
    pub fn reserve(&self, bytes: usize) -> Result<Reservation> {
        if bytes > self.budget.total() {
            return Err(Error::BudgetExceeded {
                requested: bytes,
                budget: self.budget.total(),
            });
        }
        loop {
            if let Some(reservation) = self.budget.reserve(bytes) {
                return Ok(reservation);
            }
            match self.pool.steal() {
                Some(unit) => unit.run(),
                None => thread::sleep(self.backoff),
            }
        }
    }
}
