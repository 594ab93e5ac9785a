//!
//! Condition Variable
//!
//! Works with any `Lockable`. A waiter takes a ticket while it still holds
//! the lock, then releases it and sleeps on the ticket. Notifications hand
//! out tickets in arrival order:
//!
//! - `notify_one` wakes the longest-waiting thread
//! - `notify_all` wakes everyone waiting at the time of the call
//! - with nobody waiting, both do nothing; there is no pending signal
//!
//! Spurious wakeups do not happen, but callers should still re-check their
//! condition since another thread may have run in between.
//!

use std::time::{Duration, Instant};

use weft_core::{BackendKind, SyncError};

use crate::backend::WaitQueue;
use crate::default_backend;
use crate::guard::Lockable;

/// How a timed wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Notified,
    TimedOut,
}

impl WaitStatus {
    pub fn timed_out(self) -> bool {
        self == WaitStatus::TimedOut
    }
}

pub struct Condvar {
    queue: WaitQueue,
}

impl Condvar {
    pub fn new() -> Self {
        Self::with_backend(default_backend())
    }

    pub fn with_backend(backend: BackendKind) -> Self {
        Self {
            queue: WaitQueue::new(backend),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.queue.kind()
    }

    /// Releases `lock`, sleeps until notified, then reacquires `lock`.
    pub fn wait<L: Lockable + ?Sized>(&self, lock: &L) -> Result<(), SyncError> {
        self.block(lock, None).map(|_| ())
    }

    pub fn wait_timeout<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        timeout: Duration,
    ) -> Result<WaitStatus, SyncError> {
        self.block(lock, Some(Instant::now() + timeout))
    }

    pub fn wait_until<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        deadline: Instant,
    ) -> Result<WaitStatus, SyncError> {
        self.block(lock, Some(deadline))
    }

    /// Waits for as long as `condition` returns `true`.
    pub fn wait_while<L, F>(&self, lock: &L, mut condition: F) -> Result<(), SyncError>
    where
        L: Lockable + ?Sized,
        F: FnMut() -> bool,
    {
        while condition() {
            self.wait(lock)?;
        }
        Ok(())
    }

    /// Wakes the longest-waiting thread. Returns how many were woken (0 or 1).
    pub fn notify_one(&self) -> usize {
        self.queue.notify_one()
    }

    /// Wakes every current waiter and returns how many there were.
    pub fn notify_all(&self) -> usize {
        self.queue.notify_all()
    }

    pub fn waiters(&self) -> usize {
        self.queue.waiters()
    }

    fn block<L: Lockable + ?Sized>(
        &self,
        lock: &L,
        deadline: Option<Instant>,
    ) -> Result<WaitStatus, SyncError> {
        if !lock.is_held_by_current_thread() {
            return Err(SyncError::LockNotHeld {
                primitive: lock.name(),
            });
        }
        let depth = lock.hold_depth();
        if depth > 1 {
            return Err(SyncError::RecursiveWait { depth });
        }

        let ticket = self.queue.register();
        if let Err(err) = lock.unlock() {
            self.queue.abandon(ticket);
            return Err(err);
        }
        let notified = self.queue.wait(ticket, deadline);
        lock.lock()?;

        Ok(if notified {
            WaitStatus::Notified
        } else {
            WaitStatus::TimedOut
        })
    }
}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Condvar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condvar")
            .field("backend", &self.backend())
            .field("waiters", &self.waiters())
            .finish()
    }
}
