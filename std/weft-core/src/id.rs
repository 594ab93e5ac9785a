//! Process-unique thread identity.
//!
//! `std::thread::ThreadId` cannot be stored in an atomic, which lock
//! ownership tracking needs. Every thread gets a non-zero `u64` the first
//! time it asks; threads spawned through weft are handed theirs up front so
//! the spawner knows it before the thread runs.

use std::cell::Cell;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<u64> = const { Cell::new(0) };
}

/// Thread identifier, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    /// Reserves a fresh identifier without binding it to any thread.
    pub fn allocate() -> Self {
        let raw = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        match NonZeroU64::new(raw) {
            Some(id) => Self(id),
            None => unreachable!("thread id counter wrapped"),
        }
    }

    /// Binds `self` to the calling thread.
    ///
    /// Returns `false` if the thread already had an identity, in which case
    /// the existing one is kept.
    pub fn adopt(self) -> bool {
        CURRENT.with(|cur| {
            if cur.get() != 0 {
                return false;
            }
            cur.set(self.as_u64());
            true
        })
    }

    /// Rebuilds an id from its raw value; `0` means "no thread".
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw value (never `0`).
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of the calling thread, assigned on first use.
pub fn current_thread_id() -> ThreadId {
    CURRENT.with(|cur| {
        if let Some(id) = ThreadId::from_raw(cur.get()) {
            return id;
        }
        let id = ThreadId::allocate();
        cur.set(id.as_u64());
        id
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_current_id_is_stable() {
        let a = current_thread_id();
        let b = current_thread_id();
        assert_eq!(a, b);
        assert_ne!(a.as_u64(), 0);
    }

    #[test]
    fn test_ids_differ_across_threads() {
        let here = current_thread_id();
        let there = thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_adopt_before_first_use() {
        let reserved = ThreadId::allocate();
        let seen = thread::spawn(move || {
            assert!(reserved.adopt());
            current_thread_id()
        })
        .join()
        .unwrap();
        assert_eq!(seen, reserved);
    }

    #[test]
    fn test_adopt_keeps_existing_identity() {
        let reserved = ThreadId::allocate();
        thread::spawn(move || {
            let first = current_thread_id();
            assert!(!reserved.adopt());
            assert_eq!(current_thread_id(), first);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_from_raw_zero_is_none() {
        assert!(ThreadId::from_raw(0).is_none());
        assert_eq!(ThreadId::from_raw(7).map(ThreadId::as_u64), Some(7));
    }
}
