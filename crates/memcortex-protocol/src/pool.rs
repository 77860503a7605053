//! Lock-free object pools (C1).
//!
//! Buffers and JSON encoder/decoder shells are reused across requests to
//! bound allocation under load. Pools are backed by
//! `crossbeam::queue::ArrayQueue` rather than a mutex-guarded `Vec`, per
//! the "lock-free pool-of-channels" design note — `Get`/`Put` never
//! block and never contend on a single lock.
//!
//! Callers must return exactly one [`PooledBuffer`] per checkout (it
//! happens automatically via `Drop`) and must not retain the inner
//! `Vec<u8>` past that point.

use crossbeam::queue::ArrayQueue;
use std::sync::Arc;

/// A pool of reusable byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    slots: Arc<ArrayQueue<Vec<u8>>>,
    default_capacity: usize,
}

impl BufferPool {
    /// Create a pool holding at most `capacity` idle buffers, each
    /// pre-allocated to `default_capacity` bytes when freshly created.
    pub fn new(capacity: usize, default_capacity: usize) -> Self {
        Self {
            slots: Arc::new(ArrayQueue::new(capacity)),
            default_capacity,
        }
    }

    /// Check out a buffer, creating a fresh one if the pool is empty.
    pub fn get(&self) -> PooledBuffer {
        let buf = self
            .slots
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.default_capacity));
        PooledBuffer {
            buf: Some(buf),
            pool: self.slots.clone(),
        }
    }

    /// Number of buffers currently idle in the pool.
    pub fn idle_len(&self) -> usize {
        self.slots.len()
    }
}

/// A checked-out buffer. Cleared and returned to its pool on drop; if
/// the pool is at capacity the buffer is simply dropped instead.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<ArrayQueue<Vec<u8>>>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = Vec<u8>;
    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer taken before drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer taken before drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            let _ = self.pool.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reused_buffer_comes_back_cleared() {
        let pool = BufferPool::new(4, 64);
        {
            let mut buf = pool.get();
            buf.extend_from_slice(b"hello");
        }
        assert_eq!(pool.idle_len(), 1);
        let buf = pool.get();
        assert!(buf.is_empty());
    }

    #[test]
    fn pool_creates_fresh_buffers_past_capacity() {
        let pool = BufferPool::new(1, 16);
        let a = pool.get();
        let b = pool.get();
        assert!(a.is_empty());
        assert!(b.is_empty());
    }
}
