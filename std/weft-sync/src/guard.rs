//!
//! The `Lockable` trait and its scoped guard.
//!
//! All mutex variants share one contract: ownership is tracked per thread,
//! relocking a non-recursive lock is reported instead of deadlocking, and
//! only the owner may unlock.
//!

use std::marker::PhantomData;

use weft_core::SyncError;

pub trait Lockable {
    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    /// Blocks until the calling thread owns the lock.
    fn lock(&self) -> Result<(), SyncError>;

    /// Takes the lock if it is free. `Ok(false)` when another thread holds it.
    fn try_lock(&self) -> Result<bool, SyncError>;

    fn unlock(&self) -> Result<(), SyncError>;

    fn is_held_by_current_thread(&self) -> bool;

    /// How many times the calling thread holds the lock.
    fn hold_depth(&self) -> usize {
        usize::from(self.is_held_by_current_thread())
    }

    fn guard(&self) -> Result<Guard<'_, Self>, SyncError>
    where
        Self: Sized,
    {
        self.lock()?;
        Ok(Guard::adopt(self))
    }

    fn try_guard(&self) -> Result<Option<Guard<'_, Self>>, SyncError>
    where
        Self: Sized,
    {
        if self.try_lock()? {
            Ok(Some(Guard::adopt(self)))
        } else {
            Ok(None)
        }
    }
}

/// Locks `lock` and returns its guard. Works for `dyn Lockable` too.
pub fn lock_guard<L: Lockable + ?Sized>(lock: &L) -> Result<Guard<'_, L>, SyncError> {
    lock.lock()?;
    Ok(Guard::adopt(lock))
}

/// Releases the lock when dropped. Not `Send`: the owner must unlock.
#[must_use = "dropping the guard releases the lock immediately"]
pub struct Guard<'a, L: Lockable + ?Sized> {
    lock: &'a L,
    _not_send: PhantomData<*const ()>,
}

impl<'a, L: Lockable + ?Sized> Guard<'a, L> {
    pub(crate) fn adopt(lock: &'a L) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    pub fn lockable(&self) -> &'a L {
        self.lock
    }
}

impl<L: Lockable + ?Sized> Drop for Guard<'_, L> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock() {
            tracing::error!(primitive = self.lock.name(), %err, "guard failed to release lock");
        }
    }
}

impl<L: Lockable + ?Sized> std::fmt::Debug for Guard<'_, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard").field("lock", &self.lock.name()).finish()
    }
}
