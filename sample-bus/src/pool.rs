use std::sync::{
    Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

/// Idle units kept when no explicit limit is given.
pub const DEFAULT_MAX_IDLE: usize = 512;

/// Recycles values across the producer/consumer boundary.
///
/// `get` never fails: it hands out an idle value when there is one and
/// allocates with `T::default()` otherwise. Reused values are returned as
/// they were put back, no reset is applied. Safe to share between tasks.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    max_idle: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl<T: Default> Pool<T> {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    pub fn get(&self) -> T {
        match self.lock().pop() {
            Some(value) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                value
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                T::default()
            }
        }
    }

    /// Return a value for reuse. Dropped instead when the idle list is full.
    pub fn put(&self, value: T) {
        let mut idle = self.lock();
        if idle.len() < self.max_idle {
            idle.push(value);
        }
    }

    /// Drop every idle value.
    pub fn release(&self) {
        let drained = std::mem::take(&mut *self.lock());
        log::trace!("pool released {} idle values", drained.len());
    }

    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    /// Values created because the pool was empty.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Values handed out again after a `put`.
    pub fn reused(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Default> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
