//!
//! Monitor
//!
//! A value guarded by one mutex, paired with one condition variable.
//! `synchronized()` returns a scoped guard that dereferences to the value
//! and can wait on the condition without naming the mutex again.
//!
//! The read/write mutex, semaphore, barrier, event and the task queue are
//! all built as monitors over a small state struct.
//!

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::time::{Duration, Instant};

use weft_core::{BackendKind, SyncError};

use crate::condvar::{Condvar, WaitStatus};
use crate::default_backend;
use crate::guard::Lockable;
use crate::mutex::Mutex;

pub struct Monitor<T> {
    lock: Mutex,
    cond: Condvar,
    value: UnsafeCell<T>,
}

// SAFETY: `value` is only reachable through `Synchronized`, which holds
// `lock`, or through `&mut self`.
unsafe impl<T: Send> Send for Monitor<T> {}
unsafe impl<T: Send> Sync for Monitor<T> {}

impl<T> Monitor<T> {
    pub fn new(value: T) -> Self {
        Self::with_backend(value, default_backend())
    }

    pub fn with_backend(value: T, backend: BackendKind) -> Self {
        Self {
            lock: Mutex::with_backend(backend),
            cond: Condvar::with_backend(backend),
            value: UnsafeCell::new(value),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.lock.backend()
    }

    /// Locks the monitor for the lifetime of the returned guard.
    pub fn synchronized(&self) -> Result<Synchronized<'_, T>, SyncError> {
        self.lock.lock()?;
        Ok(Synchronized::new(self))
    }

    pub fn try_synchronized(&self) -> Result<Option<Synchronized<'_, T>>, SyncError> {
        if self.lock.try_lock()? {
            Ok(Some(Synchronized::new(self)))
        } else {
            Ok(None)
        }
    }

    /// Wakes one waiter. Callable without holding the monitor.
    pub fn notify_one(&self) -> usize {
        self.cond.notify_one()
    }

    pub fn notify_all(&self) -> usize {
        self.cond.notify_all()
    }

    pub fn waiters(&self) -> usize {
        self.cond.waiters()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for Monitor<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for Monitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("lock", &self.lock)
            .field("cond", &self.cond)
            .finish_non_exhaustive()
    }
}

/// Scoped hold on a `Monitor`. Unlocks on drop.
#[must_use = "dropping the guard releases the monitor immediately"]
pub struct Synchronized<'a, T> {
    monitor: &'a Monitor<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> Synchronized<'a, T> {
    fn new(monitor: &'a Monitor<T>) -> Self {
        Self {
            monitor,
            _not_send: PhantomData,
        }
    }

    pub fn wait(&mut self) -> Result<(), SyncError> {
        self.monitor.cond.wait(&self.monitor.lock)
    }

    pub fn wait_timeout(&mut self, timeout: Duration) -> Result<WaitStatus, SyncError> {
        self.monitor.cond.wait_timeout(&self.monitor.lock, timeout)
    }

    pub fn wait_until(&mut self, deadline: Instant) -> Result<WaitStatus, SyncError> {
        self.monitor.cond.wait_until(&self.monitor.lock, deadline)
    }

    /// Waits for as long as `condition` holds for the guarded value.
    pub fn wait_while<F>(&mut self, mut condition: F) -> Result<(), SyncError>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut **self) {
            self.wait()?;
        }
        Ok(())
    }

    /// Like `wait_while`, but returns `TimedOut` if `condition` still holds
    /// at `deadline`.
    pub fn wait_until_while<F>(
        &mut self,
        deadline: Instant,
        mut condition: F,
    ) -> Result<WaitStatus, SyncError>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut **self) {
            if Instant::now() >= deadline {
                return Ok(WaitStatus::TimedOut);
            }
            self.wait_until(deadline)?;
        }
        Ok(WaitStatus::Notified)
    }

    pub fn wait_timeout_while<F>(
        &mut self,
        timeout: Duration,
        condition: F,
    ) -> Result<WaitStatus, SyncError>
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_until_while(Instant::now() + timeout, condition)
    }

    pub fn notify_one(&self) -> usize {
        self.monitor.cond.notify_one()
    }

    pub fn notify_all(&self) -> usize {
        self.monitor.cond.notify_all()
    }
}

impl<T> Deref for Synchronized<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard holds the monitor lock.
        unsafe { &*self.monitor.value.get() }
    }
}

impl<T> DerefMut for Synchronized<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard holds the monitor lock and is borrowed mutably.
        unsafe { &mut *self.monitor.value.get() }
    }
}

impl<T> Drop for Synchronized<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.monitor.lock.unlock() {
            tracing::error!(%err, "monitor guard failed to release lock");
        }
    }
}
