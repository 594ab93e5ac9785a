//!
//! weft-sync - Synchronization Primitives
//!
//! Ownership-checked locks and the composite primitives built on them:
//!
//! - `Mutex` (default and adaptive), `RecursiveMutex`, `SpinLock`
//! - `RwMutex` with a configurable `RwPolicy`
//! - `Condvar` and `Monitor<T>`
//! - `Semaphore`, `Barrier`, `Event`
//!
//! Every primitive runs on one of two backends (see `backend`). `new()`
//! picks the one the platform supports best; `with_backend` pins it.
//! Contract violations such as unlocking a lock you do not own come back as
//! `SyncError` values rather than undefined behavior.
//!

mod backend;
pub mod barrier;
pub mod condvar;
pub mod event;
pub mod guard;
pub mod monitor;
pub mod mutex;
pub mod recursive;
pub mod rwmutex;
pub mod semaphore;
pub mod spinlock;

pub use barrier::{Barrier, BarrierWaitResult};
pub use condvar::{Condvar, WaitStatus};
pub use event::{Event, EventMode};
pub use guard::{Guard, Lockable, lock_guard};
pub use monitor::{Monitor, Synchronized};
pub use mutex::{DEFAULT_SPIN_LIMIT, Mutex, MutexKind};
pub use recursive::RecursiveMutex;
pub use rwmutex::{ReadGuard, RwMutex, WriteGuard};
pub use semaphore::{Permit, Semaphore};
pub use spinlock::{Backoff, SpinLock};

pub use weft_core::{BackendKind, RwPolicy, SyncError};

use weft_core::Capabilities;

/// Backend used by `new()` constructors.
pub fn default_backend() -> BackendKind {
    BackendKind::resolve(&Capabilities::detect())
}
