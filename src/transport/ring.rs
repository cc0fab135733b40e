//! # Byte Ring
//!
//! Fixed-capacity circular byte queue between the producer (serial reader,
//! DMA completion) and the transport poll loop.
//!
//! One slot is always left empty, so a ring built with capacity `C` stores
//! at most `C - 1` bytes. Every call takes the internal mutex with
//! `try_lock`; a contended call fails fast instead of waiting.

use std::sync::{Mutex, MutexGuard, TryLockError};

use tracing::warn;

use crate::error::{LinkError, Result};

#[derive(Debug)]
struct RingState {
    data: Box<[u8]>,
    /// Next write position
    head: usize,
    /// Next read position
    tail: usize,
    /// Bumped on every mutation
    version: u64,
}

impl RingState {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn data_size(&self) -> usize {
        (self.head + self.capacity() - self.tail) % self.capacity()
    }

    fn remaining_size(&self) -> usize {
        self.capacity() - 1 - self.data_size()
    }

    fn write(&mut self, bytes: &[u8]) {
        let cap = self.capacity();
        let first = bytes.len().min(cap - self.head);
        self.data[self.head..self.head + first].copy_from_slice(&bytes[..first]);
        let rest = bytes.len() - first;
        self.data[..rest].copy_from_slice(&bytes[first..]);
        self.head = (self.head + bytes.len()) % cap;
        self.version += 1;
    }

    fn copy_out(&self, out: &mut [u8]) {
        let cap = self.capacity();
        let first = out.len().min(cap - self.tail);
        out[..first].copy_from_slice(&self.data[self.tail..self.tail + first]);
        let rest = out.len() - first;
        out[first..].copy_from_slice(&self.data[..rest]);
    }

    fn advance(&mut self, n: usize) {
        self.tail = (self.tail + n) % self.capacity();
        self.version += 1;
    }
}

/// Mutex-guarded circular byte buffer
#[derive(Debug)]
pub struct ByteRing {
    state: Mutex<RingState>,
}

impl ByteRing {
    /// Create a ring with `capacity` slots (stores `capacity - 1` bytes)
    ///
    /// # Errors
    ///
    /// Returns error if capacity is below 2
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(LinkError::InvalidConfig(format!(
                "ring capacity {} is too small (minimum 2)",
                capacity
            )));
        }

        Ok(Self {
            state: Mutex::new(RingState {
                data: vec![0u8; capacity].into_boxed_slice(),
                head: 0,
                tail: 0,
                version: 0,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, RingState>> {
        match self.state.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(LinkError::Busy("byte ring")),
            // A panicking holder cannot leave head/tail half-updated
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    /// Hold the ring lock until the guard drops
    #[cfg(test)]
    pub(crate) fn hold(&self) -> impl Sized + '_ {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Total slots, one of which is always kept free
    pub fn capacity(&self) -> usize {
        self.lock().map(|s| s.capacity()).unwrap_or(0)
    }

    /// Append as many bytes as fit, truncating the rest
    ///
    /// Returns the number of bytes stored.
    pub fn enqueue(&self, bytes: &[u8]) -> Result<usize> {
        let mut state = self.lock()?;
        let free = state.remaining_size();
        let n = bytes.len().min(free);

        if n < bytes.len() {
            warn!(
                "Byte ring truncated enqueue: {} of {} bytes stored",
                n,
                bytes.len()
            );
        }

        state.write(&bytes[..n]);
        Ok(n)
    }

    /// Append `bytes` only if all of them fit
    ///
    /// Free-space check and copy happen under one lock, so a concurrent
    /// consumer cannot change the answer in between.
    pub fn admit(&self, bytes: &[u8]) -> Result<usize> {
        let mut state = self.lock()?;
        let free = state.remaining_size();

        if bytes.len() > free {
            return Err(LinkError::Backpressure {
                len: bytes.len(),
                free,
            });
        }

        state.write(bytes);
        Ok(bytes.len())
    }

    /// Copy up to `max` buffered bytes without removing them
    pub fn peek(&self, max: usize) -> Result<Vec<u8>> {
        let state = self.lock()?;
        let mut out = vec![0u8; max.min(state.data_size())];
        state.copy_out(&mut out);
        Ok(out)
    }

    /// Remove and return up to `max` buffered bytes
    pub fn dequeue(&self, max: usize) -> Result<Vec<u8>> {
        let mut state = self.lock()?;
        let mut out = vec![0u8; max.min(state.data_size())];
        state.copy_out(&mut out);
        state.advance(out.len());
        Ok(out)
    }

    /// Drop up to `n` bytes without copying, returns how many were dropped
    pub fn discard(&self, n: usize) -> Result<usize> {
        let mut state = self.lock()?;
        let n = n.min(state.data_size());
        if n > 0 {
            state.advance(n);
        }
        Ok(n)
    }

    /// Drop everything buffered
    pub fn clear(&self) -> Result<usize> {
        let mut state = self.lock()?;
        let n = state.data_size();
        state.tail = state.head;
        state.version += 1;
        Ok(n)
    }

    /// Bytes currently stored, zero if the ring is busy
    pub fn data_size(&self) -> usize {
        self.lock().map(|s| s.data_size()).unwrap_or(0)
    }

    /// Bytes that can still be stored, zero if the ring is busy
    pub fn remaining_size(&self) -> usize {
        self.lock().map(|s| s.remaining_size()).unwrap_or(0)
    }

    /// Mutation counter, useful to detect producer activity between polls
    pub fn version(&self) -> u64 {
        self.lock().map(|s| s.version).unwrap_or(0)
    }
}
