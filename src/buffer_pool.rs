//! Reusable scratch buffers for inbound frames.
//!
//! The listener acquires one buffer per read and releases it as soon as the
//! frame has been parsed into owned values. Memory held by the pool is
//! bounded twice over: buffers that grew past [`DEFAULT_MAX_POOLED_CAPACITY`]
//! are dropped instead of pooled, and at most [`DEFAULT_MAX_IDLE`] buffers
//! are kept idle.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;

/// Largest buffer capacity that is returned to the pool (64 KiB).
pub const DEFAULT_MAX_POOLED_CAPACITY: usize = 64 * 1024;

/// Maximum number of idle buffers kept.
pub const DEFAULT_MAX_IDLE: usize = 32;

/// Capacity of freshly allocated buffers.
const INITIAL_BUFFER_CAPACITY: usize = 4 * 1024;

/// Pool of frame buffers. Clones share the same idle list.
#[derive(Debug, Clone)]
pub struct FrameBufferPool {
    idle: Arc<Mutex<Vec<BytesMut>>>,
    max_capacity: usize,
    max_idle: usize,
}

impl FrameBufferPool {
    /// Create a pool with the given capacity ceiling and idle limit.
    pub fn new(max_capacity: usize, max_idle: usize) -> Self {
        Self {
            idle: Arc::new(Mutex::new(Vec::new())),
            max_capacity,
            max_idle,
        }
    }

    /// Take an empty buffer, reusing an idle one when available.
    pub fn acquire(&self) -> BytesMut {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        reused.unwrap_or_else(|| BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY.min(self.max_capacity)))
    }

    /// Return a buffer. Returns `true` if it was pooled, `false` if dropped.
    pub fn release(&self, mut buf: BytesMut) -> bool {
        if buf.capacity() > self.max_capacity {
            log::trace!(
                "dropping oversized frame buffer ({} > {} bytes)",
                buf.capacity(),
                self.max_capacity
            );
            return false;
        }
        buf.clear();

        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() >= self.max_idle {
            return false;
        }
        idle.push(buf);
        true
    }

    /// Number of buffers currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Configured capacity ceiling.
    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }
}

impl Default for FrameBufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POOLED_CAPACITY, DEFAULT_MAX_IDLE)
    }
}
