//! A fixed-capacity, single-producer/multi-producer-safe, single-consumer
//! byte ring used by the log writer's drain thread. The producer reserves
//! budget up front ([`RingAllocator::alloc`]), writes into a scratch
//! buffer, then hands it to the ring ([`RingSlot::commit`]); the consumer
//! pulls committed frames back out in FIFO order
//! ([`RingAllocator::try_pop`]).
//!
//! Mirrors `vec_pool.rs`'s "hand back a typed guard that returns its
//! reservation on `Drop`" shape: a [`RingSlot`] reserves admission budget
//! at `alloc` time and only turns that reservation into a real,
//! consumer-visible entry once committed. A publisher that panics
//! mid-write simply drops an uncommitted slot, releasing the reservation
//! without the ring ever seeing the partial write.
//!
//! A request that doesn't fit before the physical end of the backing array
//! wraps the tail to zero rather than splitting the frame, so every entry
//! the consumer reads is one contiguous slice — the "dummy wrap" from the
//! original design, realized here as an in-memory FIFO of `(offset, len)`
//! entries rather than an in-band filler record, since producer and
//! consumer share the same process and lock.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::errors::CbufError;

const POLL_INTERVAL: Duration = Duration::from_micros(200);

struct RingInner {
    buf: Vec<u8>,
    capacity: usize,
    tail: usize,
    entries: VecDeque<(usize, usize)>,
    used: usize,
    reserved: usize,
    closed: bool,
}

/// Handle shared by the producer side (`alloc`) and the consumer side
/// (`try_pop`) of one ring.
#[derive(Clone)]
pub struct RingAllocator {
    inner: Arc<Mutex<RingInner>>,
}

impl RingAllocator {
    pub fn new(capacity: usize) -> Self {
        RingAllocator {
            inner: Arc::new(Mutex::new(RingInner {
                buf: vec![0u8; capacity],
                capacity,
                tail: 0,
                entries: VecDeque::new(),
                used: 0,
                reserved: 0,
                closed: false,
            })),
        }
    }

    /// Reserves `size` bytes of admission budget, busy-waiting with a short
    /// sleep while the ring doesn't have room. Returns a [`RingSlot`] the
    /// caller fills with exactly the frame's bytes and then commits.
    pub fn alloc(&self, size: usize) -> Result<RingSlot, CbufError> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    return Err(CbufError::Corruption {
                        offset: 0,
                        reason: "ring closed while waiting for space".to_string(),
                    });
                }
                if inner.capacity - inner.used - inner.reserved >= size {
                    inner.reserved += size;
                    break;
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
        Ok(RingSlot {
            ring: self.inner.clone(),
            reservation: size,
            buf: Vec::with_capacity(size),
            committed: false,
        })
    }

    /// Pops the oldest committed entry, or `None` if the ring is empty.
    pub fn try_pop(&self) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap();
        let (offset, len) = inner.entries.pop_front()?;
        let bytes = inner.buf[offset..offset + len].to_vec();
        inner.used -= len;
        Some(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().entries.is_empty()
    }

    /// Marks the ring closed: further `alloc` calls fail instead of
    /// blocking forever. Entries already queued remain poppable.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
    }
}

/// A reserved, not-yet-visible write window into a [`RingAllocator`].
/// Write the frame's bytes (via `Deref`/`DerefMut` to `Vec<u8>`), then call
/// [`RingSlot::commit`]. Dropping without committing releases the
/// reservation and leaves the ring untouched.
pub struct RingSlot {
    ring: Arc<Mutex<RingInner>>,
    reservation: usize,
    buf: Vec<u8>,
    committed: bool,
}

impl Deref for RingSlot {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        &self.buf
    }
}

impl DerefMut for RingSlot {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl RingSlot {
    /// Places this slot's bytes into the ring, wrapping the tail to zero
    /// if they don't fit contiguously before the physical end. Busy-waits
    /// if wrapping would overwrite an entry the consumer hasn't read yet
    /// (budget admission in `alloc` only bounds total bytes, not
    /// fragmentation, so this is the precise check).
    pub fn commit(self) {
        let len = self.buf.len();
        loop {
            let mut inner = self.ring.lock().unwrap();
            if inner.tail + len <= inner.capacity {
                let offset = inner.tail;
                inner.buf[offset..offset + len].copy_from_slice(&self.buf);
                inner.entries.push_back((offset, len));
                inner.tail = if offset + len == inner.capacity {
                    0
                } else {
                    offset + len
                };
                inner.used += len;
                inner.reserved -= self.reservation;
                return;
            }
            let safe_to_wrap = inner.entries.front().map_or(true, |&(o, _)| o >= len);
            if safe_to_wrap {
                inner.buf[0..len].copy_from_slice(&self.buf);
                inner.entries.push_back((0, len));
                inner.tail = len;
                inner.used += len;
                inner.reserved -= self.reservation;
                return;
            }
            drop(inner);
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Drop for RingSlot {
    fn drop(&mut self) {
        if !self.committed {
            let mut inner = self.ring.lock().unwrap();
            inner.reserved -= self.reservation;
        }
    }
}
