//! Fixed-capacity circular byte store.
//!
//! The buffer sits between a socket read task (producer) and the frame parser
//! (consumer). Each operation takes the internal mutex for its own duration
//! only; there is no lock-now-release-later API.
//!
//! One slot is always kept empty so that `head == tail` unambiguously means
//! "empty". A buffer created with capacity `C` therefore holds at most `C - 1`
//! bytes. Appending past that is an error: the buffer neither grows nor
//! applies backpressure.

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingBufferError {
    #[error("ring buffer overflow: {requested} bytes requested, {available} available")]
    Overflow { requested: usize, available: usize },
    #[error("ring buffer underflow: cannot consume {requested} of {size} bytes")]
    Underflow { requested: usize, size: usize },
}

#[derive(Debug)]
struct Inner {
    data: Box<[u8]>,
    head: usize,
    tail: usize,
}

impl Inner {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn size(&self) -> usize {
        (self.tail + self.capacity() - self.head) % self.capacity()
    }

    fn at(&self, logical: usize) -> u8 {
        self.data[(self.head + logical) % self.capacity()]
    }

    fn matches_at(&self, logical: usize, seq: &[u8]) -> bool {
        seq.iter()
            .enumerate()
            .all(|(i, b)| self.at(logical + i) == *b)
    }
}

/// Thread-safe ring buffer of bytes.
#[derive(Debug)]
pub struct RingBuffer {
    inner: Mutex<Inner>,
}

impl RingBuffer {
    /// Creates a buffer with `capacity` slots (usable capacity `capacity - 1`).
    /// Capacities below 2 are raised to 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            inner: Mutex::new(Inner {
                data: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Total slot count, including the always-empty slot.
    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    /// Number of bytes currently stored.
    pub fn size(&self) -> usize {
        self.lock().size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Bytes that can still be appended.
    pub fn free(&self) -> usize {
        let inner = self.lock();
        inner.capacity() - 1 - inner.size()
    }

    /// Copies `bytes` in at the tail. Fails without writing anything if the
    /// tail would run into the head.
    pub fn append(&self, bytes: &[u8]) -> Result<(), RingBufferError> {
        let mut inner = self.lock();
        let cap = inner.capacity();
        let available = cap - 1 - inner.size();
        if bytes.len() > available {
            return Err(RingBufferError::Overflow {
                requested: bytes.len(),
                available,
            });
        }

        let tail = inner.tail;
        let first = bytes.len().min(cap - tail);
        inner.data[tail..tail + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        inner.data[..rest].copy_from_slice(&bytes[first..]);
        inner.tail = (tail + bytes.len()) % cap;
        Ok(())
    }

    /// Consumes `n` bytes from the front.
    pub fn advance_head(&self, n: usize) -> Result<(), RingBufferError> {
        let mut inner = self.lock();
        let size = inner.size();
        if n > size {
            return Err(RingBufferError::Underflow { requested: n, size });
        }
        inner.head = (inner.head + n) % inner.capacity();
        Ok(())
    }

    /// Drops everything stored.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.head = 0;
        inner.tail = 0;
    }

    /// Copies out up to `max_len` bytes from the front, in order.
    pub fn current_contents(&self, max_len: usize) -> Vec<u8> {
        let inner = self.lock();
        let n = max_len.min(inner.size());
        let cap = inner.capacity();
        let first = n.min(cap - inner.head);
        let mut out = Vec::with_capacity(n);
        out.extend_from_slice(&inner.data[inner.head..inner.head + first]);
        out.extend_from_slice(&inner.data[..n - first]);
        out
    }

    /// True if the stored bytes start with `seq`.
    pub fn begins_with(&self, seq: &[u8]) -> bool {
        let inner = self.lock();
        seq.len() <= inner.size() && inner.matches_at(0, seq)
    }

    /// Logical offset of the first occurrence of `seq`.
    pub fn index_of(&self, seq: &[u8]) -> Option<usize> {
        self.index_of_from(seq, 0)
    }

    /// Logical offset of the first occurrence of `seq` at or after `start`.
    pub fn index_of_from(&self, seq: &[u8], start: usize) -> Option<usize> {
        let inner = self.lock();
        let size = inner.size();
        if seq.len() > size {
            return None;
        }
        (start..=size - seq.len()).find(|&i| inner.matches_at(i, seq))
    }
}
