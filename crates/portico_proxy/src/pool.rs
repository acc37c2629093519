//! Time-expiring pool of fixed-size copy buffers for body streaming.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Chunk size used when relaying upstream bodies.
pub const BUFFER_SIZE: usize = 1024;

/// Idle time after which a parked buffer is discarded.
pub const BUFFER_EXPIRY: Duration = Duration::from_secs(3);

struct ParkedBuffer {
    buf: Vec<u8>,
    parked_at: Instant,
}

/// LIFO pool of reusable byte buffers with an inactivity expiry.
pub struct BufferPool {
    expiry: Duration,
    parked: Mutex<Vec<ParkedBuffer>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::with_expiry(BUFFER_EXPIRY)
    }

    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            expiry,
            parked: Mutex::new(Vec::new()),
        }
    }

    /// Take a pooled buffer, discarding any that idled past the expiry.
    pub fn take(&self) -> Vec<u8> {
        let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(entry) = parked.pop() {
            if entry.parked_at.elapsed() <= self.expiry {
                return entry.buf;
            }
        }
        vec![0u8; BUFFER_SIZE]
    }

    /// Return a buffer once the read loop is done with it.
    pub fn put(&self, buf: Vec<u8>) {
        let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
        parked.push(ParkedBuffer {
            buf,
            parked_at: Instant::now(),
        });
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_buffers_have_the_fixed_size() {
        let pool = BufferPool::new();
        assert_eq!(pool.take().len(), BUFFER_SIZE);
    }

    #[test]
    fn returned_buffers_are_reused() {
        let pool = BufferPool::new();
        let mut buf = pool.take();
        buf[0] = 7;
        pool.put(buf);
        assert_eq!(pool.take()[0], 7);
    }

    #[test]
    fn expired_buffers_are_discarded() {
        let pool = BufferPool::with_expiry(Duration::from_millis(1));
        let mut buf = pool.take();
        buf[0] = 7;
        pool.put(buf);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pool.take()[0], 0);
    }
}
