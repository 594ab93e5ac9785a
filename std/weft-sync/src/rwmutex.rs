//!
//! Read/Write Mutex
//!
//! Many readers or one writer. Readers are tracked per thread, so a thread
//! that already reads can read again even while a writer waits, and a
//! stray `unlock_read` is reported instead of corrupting the count.
//!
//! Whether new readers may pass a waiting writer is decided by `RwPolicy`:
//!
//! - `WriterPreferred` - never (default)
//! - `ReaderBatch(n)` - up to `n` per writer turn
//! - `ReaderPreferred` - always; writers can starve
//!
//! Upgrading a read hold to a write hold is not supported.
//!

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use weft_core::{BackendKind, RwPolicy, SyncError, ThreadId, current_thread_id};

use crate::condvar::WaitStatus;
use crate::default_backend;
use crate::monitor::Monitor;

#[derive(Debug, Default)]
struct RwState {
    readers: HashMap<ThreadId, usize>,
    reader_total: usize,
    writer: Option<ThreadId>,
    writers_waiting: usize,
    admitted_past_writer: usize,
}

impl RwState {
    fn admits_reader(&self, policy: RwPolicy) -> bool {
        self.writer.is_none()
            && (self.writers_waiting == 0 || policy.admits_reader(self.admitted_past_writer))
    }

    fn admits_writer(&self) -> bool {
        self.writer.is_none() && self.reader_total == 0
    }

    fn add_reader(&mut self, me: ThreadId) {
        if self.writers_waiting > 0 {
            self.admitted_past_writer += 1;
        }
        *self.readers.entry(me).or_insert(0) += 1;
        self.reader_total += 1;
    }

    /// Re-entry for a thread that already holds a read lock.
    fn reenter(&mut self, me: ThreadId) -> bool {
        match self.readers.get_mut(&me) {
            Some(depth) => {
                *depth += 1;
                self.reader_total += 1;
                true
            }
            None => false,
        }
    }

    fn set_writer(&mut self, me: ThreadId) {
        self.writer = Some(me);
        self.admitted_past_writer = 0;
    }

    fn check_read(&self, me: ThreadId) -> Result<(), SyncError> {
        if self.writer == Some(me) {
            return Err(SyncError::WouldDeadlock {
                primitive: "rwmutex",
                caller: me,
            });
        }
        Ok(())
    }

    fn check_write(&self, me: ThreadId) -> Result<(), SyncError> {
        self.check_read(me)?;
        if self.readers.contains_key(&me) {
            return Err(SyncError::UpgradeUnsupported);
        }
        Ok(())
    }
}

pub struct RwMutex {
    state: Monitor<RwState>,
    policy: RwPolicy,
}

impl RwMutex {
    pub fn new() -> Self {
        Self::with_policy(RwPolicy::default())
    }

    pub fn with_policy(policy: RwPolicy) -> Self {
        Self::with_backend(default_backend(), policy)
    }

    pub fn with_backend(backend: BackendKind, policy: RwPolicy) -> Self {
        Self {
            state: Monitor::with_backend(RwState::default(), backend),
            policy,
        }
    }

    pub fn policy(&self) -> RwPolicy {
        self.policy
    }

    pub fn backend(&self) -> BackendKind {
        self.state.backend()
    }

    pub fn lock_read(&self) -> Result<(), SyncError> {
        let me = current_thread_id();
        let policy = self.policy;
        let mut state = self.state.synchronized()?;
        state.check_read(me)?;
        if state.reenter(me) {
            return Ok(());
        }
        state.wait_while(|s| !s.admits_reader(policy))?;
        state.add_reader(me);
        Ok(())
    }

    pub fn try_lock_read(&self) -> Result<bool, SyncError> {
        let me = current_thread_id();
        let mut state = self.state.synchronized()?;
        state.check_read(me)?;
        if state.reenter(me) {
            return Ok(true);
        }
        if !state.admits_reader(self.policy) {
            return Ok(false);
        }
        state.add_reader(me);
        Ok(true)
    }

    pub fn try_lock_read_for(&self, timeout: Duration) -> Result<bool, SyncError> {
        let me = current_thread_id();
        let policy = self.policy;
        let deadline = Instant::now() + timeout;
        let mut state = self.state.synchronized()?;
        state.check_read(me)?;
        if state.reenter(me) {
            return Ok(true);
        }
        if state.wait_until_while(deadline, |s| !s.admits_reader(policy))?
            == WaitStatus::TimedOut
        {
            return Ok(false);
        }
        state.add_reader(me);
        Ok(true)
    }

    pub fn unlock_read(&self) -> Result<(), SyncError> {
        let me = current_thread_id();
        let mut state = self.state.synchronized()?;
        let depth = state
            .readers
            .get_mut(&me)
            .ok_or(SyncError::ReadNotHeld { caller: me })?;
        *depth -= 1;
        if *depth == 0 {
            state.readers.remove(&me);
        }
        state.reader_total -= 1;
        if state.reader_total == 0 {
            state.notify_all();
        }
        Ok(())
    }

    pub fn lock_write(&self) -> Result<(), SyncError> {
        let me = current_thread_id();
        let mut state = self.state.synchronized()?;
        state.check_write(me)?;
        state.writers_waiting += 1;
        let waited = state.wait_while(|s| !s.admits_writer());
        state.writers_waiting -= 1;
        waited?;
        state.set_writer(me);
        Ok(())
    }

    pub fn try_lock_write(&self) -> Result<bool, SyncError> {
        let me = current_thread_id();
        let mut state = self.state.synchronized()?;
        state.check_write(me)?;
        if !state.admits_writer() {
            return Ok(false);
        }
        state.set_writer(me);
        Ok(true)
    }

    pub fn try_lock_write_for(&self, timeout: Duration) -> Result<bool, SyncError> {
        let me = current_thread_id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state.synchronized()?;
        state.check_write(me)?;
        state.writers_waiting += 1;
        let waited = state.wait_until_while(deadline, |s| !s.admits_writer());
        state.writers_waiting -= 1;
        if waited? == WaitStatus::TimedOut {
            if state.writers_waiting == 0 {
                state.admitted_past_writer = 0;
            }
            // Readers held back by this writer may go now.
            state.notify_all();
            return Ok(false);
        }
        state.set_writer(me);
        Ok(true)
    }

    pub fn unlock_write(&self) -> Result<(), SyncError> {
        let me = current_thread_id();
        let mut state = self.state.synchronized()?;
        if state.writer != Some(me) {
            return Err(SyncError::NotOwner {
                primitive: "rwmutex",
                caller: me,
            });
        }
        state.writer = None;
        state.notify_all();
        Ok(())
    }

    pub fn read(&self) -> Result<ReadGuard<'_>, SyncError> {
        self.lock_read()?;
        Ok(ReadGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn write(&self) -> Result<WriteGuard<'_>, SyncError> {
        self.lock_write()?;
        Ok(WriteGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Total read holds across all threads.
    pub fn reader_count(&self) -> Result<usize, SyncError> {
        Ok(self.state.synchronized()?.reader_total)
    }

    pub fn waiting_writers(&self) -> Result<usize, SyncError> {
        Ok(self.state.synchronized()?.writers_waiting)
    }

    pub fn is_write_locked(&self) -> Result<bool, SyncError> {
        Ok(self.state.synchronized()?.writer.is_some())
    }
}

impl Default for RwMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RwMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RwMutex")
            .field("policy", &self.policy)
            .field("backend", &self.backend())
            .finish_non_exhaustive()
    }
}

#[must_use = "dropping the guard releases the read lock immediately"]
pub struct ReadGuard<'a> {
    lock: &'a RwMutex,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock_read() {
            tracing::error!(%err, "read guard failed to release lock");
        }
    }
}

#[must_use = "dropping the guard releases the write lock immediately"]
pub struct WriteGuard<'a> {
    lock: &'a RwMutex,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock_write() {
            tracing::error!(%err, "write guard failed to release lock");
        }
    }
}
