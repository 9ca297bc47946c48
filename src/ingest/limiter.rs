use std::sync::{Arc, Condvar, Mutex};

/// Counting gate bounding concurrent outbound connections.
///
/// Cloning shares the same permits.
#[derive(Clone, Debug)]
pub struct ConnectionLimiter {
    inner: Arc<LimiterState>,
}

#[derive(Debug)]
struct LimiterState {
    capacity: usize,
    in_use: Mutex<usize>,
    released: Condvar,
}

impl ConnectionLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(LimiterState {
                capacity: capacity.max(1),
                in_use: Mutex::new(0),
                released: Condvar::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn in_use(&self) -> usize {
        *self
            .inner
            .in_use
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until a permit is free.
    pub fn acquire(&self) -> ConnectionPermit {
        let state = &self.inner;
        let mut in_use = state
            .in_use
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        while *in_use >= state.capacity {
            in_use = state
                .released
                .wait(in_use)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *in_use += 1;
        ConnectionPermit {
            inner: self.inner.clone(),
        }
    }
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct ConnectionPermit {
    inner: Arc<LimiterState>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        let mut in_use = self
            .inner
            .in_use
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *in_use = in_use.saturating_sub(1);
        self.inner.released.notify_one();
    }
}
