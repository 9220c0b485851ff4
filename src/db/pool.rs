//! Bounded connection pool
//!
//! Connections are created lazily up to `max`; a borrowed connection returns to
//! the idle list when its [`Pooled`] guard drops, unless it was discarded.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, WtfError};

type Factory<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// A bounded pool for reusable connection-like objects.
pub struct Pool<T> {
    max: usize,
    factory: Factory<T>,
    idle: Mutex<Vec<T>>,
    available: Condvar,
    in_flight: AtomicUsize,
}

/// A pooled value that returns to the pool on drop.
pub struct Pooled<T> {
    pool: Arc<Pool<T>>,
    value: Option<T>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled").field("value", &self.value).finish_non_exhaustive()
    }
}

const CANCEL_POLL: Duration = Duration::from_millis(5);

impl<T> Pool<T> {
    pub fn new<F>(max: usize, factory: F) -> Arc<Self>
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Arc::new(Self {
            max: max.max(1),
            factory: Box::new(factory),
            idle: Mutex::new(Vec::new()),
            available: Condvar::new(),
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Borrow a value, waiting up to `timeout` while the pool is exhausted.
    ///
    /// `cancelled` is polled while waiting; when it returns true the wait ends
    /// with [`WtfError::Cancelled`].
    pub fn acquire<F>(self: &Arc<Self>, timeout: Duration, mut cancelled: F) -> Result<Pooled<T>>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut idle = self.idle.lock();
        loop {
            if cancelled() {
                return Err(WtfError::Cancelled);
            }
            if let Some(item) = idle.pop() {
                return Ok(self.wrap(item));
            }

            if self.in_flight.load(Ordering::SeqCst) < self.max {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                drop(idle);
                return match (self.factory)() {
                    Ok(item) => Ok(self.wrap(item)),
                    Err(e) => {
                        self.discard();
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(WtfError::PoolExhausted(timeout.as_millis() as u64));
            }
            let wait = (deadline - now).min(CANCEL_POLL);
            self.available.wait_for(&mut idle, wait);
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn wrap(self: &Arc<Self>, item: T) -> Pooled<T> {
        Pooled {
            pool: Arc::clone(self),
            value: Some(item),
        }
    }

    fn release(&self, item: T) {
        self.idle.lock().push(item);
        self.available.notify_one();
    }

    fn discard(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.available.notify_one();
    }
}

impl<T> Pooled<T> {
    /// Drop the value instead of returning it to the pool
    pub fn discard(mut self) {
        if self.value.take().is_some() {
            self.pool.discard();
        }
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.value.as_ref() {
            Some(value) => value,
            None => unreachable!("pooled value is only taken on drop or discard"),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.value.as_mut() {
            Some(value) => value,
            None => unreachable!("pooled value is only taken on drop or discard"),
        }
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.value.take() {
            self.pool.release(item);
        }
    }
}
