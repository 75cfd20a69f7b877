//! Connection Limiting
//!
//! Caps the number of client connections the relay serves at once. A slot
//! is held for the lifetime of a connection's accept loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Connection limiter that tracks and enforces connection limits.
#[derive(Clone)]
pub struct ConnectionLimiter {
    inner: Arc<ConnectionLimiterInner>,
}

struct ConnectionLimiterInner {
    active: AtomicUsize,
    max_connections: usize,
}

impl ConnectionLimiter {
    /// Creates a new connection limiter with the given maximum.
    pub fn new(max_connections: usize) -> Self {
        ConnectionLimiter {
            inner: Arc::new(ConnectionLimiterInner {
                active: AtomicUsize::new(0),
                max_connections,
            }),
        }
    }

    /// Tries to acquire a connection slot.
    ///
    /// Returns `None` at capacity. The guard releases the slot when dropped.
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        self.inner
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.inner.max_connections).then_some(current + 1)
            })
            .ok()
            .map(|_| ConnectionGuard {
                inner: self.inner.clone(),
            })
    }

    /// Returns the current number of active connections.
    pub fn active_count(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }
}

/// RAII guard that releases the connection slot on drop.
pub struct ConnectionGuard {
    inner: Arc<ConnectionLimiterInner>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
    }
}
