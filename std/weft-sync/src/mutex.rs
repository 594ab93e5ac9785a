//!
//! Non-recursive mutex, default and adaptive.
//!
//! The lock itself comes from the backend; this layer adds ownership so
//! that misuse is reported rather than left undefined:
//!
//! - `lock()` by the current owner fails with `WouldDeadlock`
//! - `unlock()` by anyone else fails with `NotOwner`
//!
//! The adaptive variant retries `try_lock` up to `spin_limit` times before
//! it parks, which pays off for very short critical sections.
//!

use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use weft_core::{BackendKind, SyncError, current_thread_id};

use crate::backend::RawMutex;
use crate::default_backend;
use crate::guard::Lockable;

/// `try_lock` attempts an adaptive mutex makes before blocking.
pub const DEFAULT_SPIN_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexKind {
    Default,
    Adaptive { spin_limit: u32 },
}

pub struct Mutex {
    raw: RawMutex,
    /// Raw `ThreadId` of the holder, `0` when free.
    owner: AtomicU64,
    kind: MutexKind,
}

impl Mutex {
    pub fn new() -> Self {
        Self::with_backend(default_backend())
    }

    pub fn with_backend(backend: BackendKind) -> Self {
        Self {
            raw: RawMutex::new(backend),
            owner: AtomicU64::new(0),
            kind: MutexKind::Default,
        }
    }

    pub fn adaptive() -> Self {
        Self::adaptive_with(default_backend(), DEFAULT_SPIN_LIMIT)
    }

    pub fn adaptive_with(backend: BackendKind, spin_limit: u32) -> Self {
        Self {
            kind: MutexKind::Adaptive { spin_limit },
            ..Self::with_backend(backend)
        }
    }

    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    pub fn backend(&self) -> BackendKind {
        self.raw.kind()
    }

    /// Like `lock`, but gives up once `timeout` has elapsed.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, SyncError> {
        let me = self.check_not_owner()?;
        if !self.raw.try_lock_until(Instant::now() + timeout) {
            return Ok(false);
        }
        self.owner.store(me, Ordering::Release);
        Ok(true)
    }

    fn check_not_owner(&self) -> Result<u64, SyncError> {
        let me = current_thread_id();
        if self.owner.load(Ordering::Acquire) == me.as_u64() {
            return Err(SyncError::WouldDeadlock {
                primitive: self.name(),
                caller: me,
            });
        }
        Ok(me.as_u64())
    }

    fn spin(&self, spin_limit: u32) -> bool {
        for _ in 0..spin_limit {
            if self.raw.try_lock() {
                return true;
            }
            hint::spin_loop();
        }
        false
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Lockable for Mutex {
    fn name(&self) -> &'static str {
        match self.kind {
            MutexKind::Default => "mutex",
            MutexKind::Adaptive { .. } => "adaptive mutex",
        }
    }

    fn lock(&self) -> Result<(), SyncError> {
        let me = self.check_not_owner()?;
        let acquired = match self.kind {
            MutexKind::Adaptive { spin_limit } => self.spin(spin_limit),
            MutexKind::Default => false,
        };
        if !acquired {
            self.raw.lock();
        }
        self.owner.store(me, Ordering::Release);
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, SyncError> {
        let me = self.check_not_owner()?;
        if !self.raw.try_lock() {
            return Ok(false);
        }
        self.owner.store(me, Ordering::Release);
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
        self.owner.store(0, Ordering::Release);
        self.raw.unlock();
        Ok(())
    }

    fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread_id().as_u64()
    }
}

impl std::fmt::Debug for Mutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("kind", &self.kind)
            .field("backend", &self.backend())
            .field("locked", &(self.owner.load(Ordering::Relaxed) != 0))
            .finish()
    }
}
