//! Recursive mutex: the owner may lock again and must unlock as many times.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use weft_core::{BackendKind, SyncError, ThreadId, current_thread_id};

use crate::backend::RawMutex;
use crate::default_backend;
use crate::guard::Lockable;

pub struct RecursiveMutex {
    raw: RawMutex,
    owner: AtomicU64,
    /// Only touched by the owner.
    depth: AtomicUsize,
}

impl RecursiveMutex {
    pub fn new() -> Self {
        Self::with_backend(default_backend())
    }

    pub fn with_backend(backend: BackendKind) -> Self {
        Self {
            raw: RawMutex::new(backend),
            owner: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.raw.kind()
    }

    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, SyncError> {
        let me = current_thread_id();
        if self.reenter(me) {
            return Ok(true);
        }
        if !self.raw.try_lock_until(Instant::now() + timeout) {
            return Ok(false);
        }
        self.take(me);
        Ok(true)
    }

    fn reenter(&self, me: ThreadId) -> bool {
        if self.owner.load(Ordering::Acquire) == me.as_u64() {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    fn take(&self, me: ThreadId) {
        self.depth.store(1, Ordering::Relaxed);
        self.owner.store(me.as_u64(), Ordering::Release);
    }
}

impl Default for RecursiveMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockable for RecursiveMutex {
    fn name(&self) -> &'static str {
        "recursive mutex"
    }

    fn lock(&self) -> Result<(), SyncError> {
        let me = current_thread_id();
        if !self.reenter(me) {
            self.raw.lock();
            self.take(me);
        }
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, SyncError> {
        let me = current_thread_id();
        if self.reenter(me) {
            return Ok(true);
        }
        if !self.raw.try_lock() {
            return Ok(false);
        }
        self.take(me);
        Ok(true)
    }

    fn unlock(&self) -> Result<(), SyncError> {
        let me = current_thread_id();
        if self.owner.load(Ordering::Acquire) != me.as_u64() {
            return Err(SyncError::NotOwner {
                primitive: self.name(),
                caller: me,
            });
        }
        if self.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(0, Ordering::Release);
            self.raw.unlock();
        }
        Ok(())
    }

    fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread_id().as_u64()
    }

    fn hold_depth(&self) -> usize {
        if self.is_held_by_current_thread() {
            self.depth.load(Ordering::Relaxed)
        } else {
            0
        }
    }
}
