//!
//! Spinlock
//!
//! Test-and-test-and-set on an `AtomicBool`: contenders spin on a plain load
//! and only attempt the swap once the lock looks free. Each failed round
//! doubles the spin count until it escalates to `yield_now()`.
//!
//! Meant for critical sections of a few instructions. Anything that can
//! block belongs under a `Mutex`.
//!

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use weft_core::{SyncError, current_thread_id};

use crate::guard::Lockable;

const SPIN_LIMIT: u32 = 6;

/// Exponential backoff for contended spinning.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spins `2^step` times, or yields once the spin budget is used up.
    pub fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                hint::spin_loop();
            }
            self.step += 1;
        } else {
            thread::yield_now();
        }
    }

    pub fn is_yielding(&self) -> bool {
        self.step > SPIN_LIMIT
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }
}

#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
    owner: AtomicU64,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicU64::new(0),
        }
    }

    fn acquire_once(&self) -> bool {
        !self.locked.load(Ordering::Relaxed)
            && self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }
}

impl Lockable for SpinLock {
    fn name(&self) -> &'static str {
        "spinlock"
    }

    fn lock(&self) -> Result<(), SyncError> {
        let me = current_thread_id();
        if self.owner.load(Ordering::Relaxed) == me.as_u64() {
            return Err(SyncError::WouldDeadlock {
                primitive: self.name(),
                caller: me,
            });
        }
        let mut backoff = Backoff::new();
        while !self.acquire_once() {
            backoff.snooze();
        }
        self.owner.store(me.as_u64(), Ordering::Relaxed);
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, SyncError> {
        let me = current_thread_id();
        if self.owner.load(Ordering::Relaxed) == me.as_u64() {
            return Err(SyncError::WouldDeadlock {
                primitive: self.name(),
                caller: me,
            });
        }
        // compare_exchange_weak may fail spuriously; retry while free.
        while !self.locked.load(Ordering::Relaxed) {
            if self.acquire_once() {
                self.owner.store(me.as_u64(), Ordering::Relaxed);
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn unlock(&self) -> Result<(), SyncError> {
        let me = current_thread_id();
        if self.owner.load(Ordering::Relaxed) != me.as_u64() {
            return Err(SyncError::NotOwner {
                primitive: self.name(),
                caller: me,
            });
        }
        self.owner.store(0, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        Ok(())
    }

    fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_thread_id().as_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_backoff_escalates_to_yield() {
        let mut backoff = Backoff::new();
        for _ in 0..=SPIN_LIMIT {
            assert!(!backoff.is_yielding());
            backoff.snooze();
        }
        assert!(backoff.is_yielding());
        backoff.reset();
        assert!(!backoff.is_yielding());
    }

    #[test]
    fn test_spinlock_exclusion() {
        let lock = Arc::new(SpinLock::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let _guard = lock.guard().unwrap();
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4000);
    }

    #[test]
    fn test_spinlock_owner_checks() {
        let lock = Arc::new(SpinLock::new());
        assert!(lock.try_lock().unwrap());
        assert!(matches!(lock.lock(), Err(SyncError::WouldDeadlock { .. })));

        let other = Arc::clone(&lock);
        let (free, unlock) =
            thread::spawn(move || (other.try_lock().unwrap(), other.unlock()))
                .join()
                .unwrap();
        assert!(!free);
        assert!(matches!(unlock, Err(SyncError::NotOwner { .. })));

        lock.unlock().unwrap();
        assert!(!lock.is_held_by_current_thread());
    }
}
