//!
//! Event
//!
//! A signaled/unsignaled flag threads can wait on.
//!
//! - Manual-reset: stays signaled until `reset()`; `signal()` releases every
//!   waiter.
//! - Auto-reset: each signal is consumed by exactly one waiter, which clears
//!   it on the way out. Signals raised while already signaled coalesce.
//!

use std::time::Duration;

use weft_core::{BackendKind, SyncError};

use crate::condvar::WaitStatus;
use crate::default_backend;
use crate::monitor::Monitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    AutoReset,
    ManualReset,
}

pub struct Event {
    mode: EventMode,
    signaled: Monitor<bool>,
}

impl Event {
    pub fn new(mode: EventMode, initially_signaled: bool) -> Self {
        Self::with_backend(mode, initially_signaled, default_backend())
    }

    pub fn with_backend(mode: EventMode, initially_signaled: bool, backend: BackendKind) -> Self {
        Self {
            mode,
            signaled: Monitor::with_backend(initially_signaled, backend),
        }
    }

    pub fn mode(&self) -> EventMode {
        self.mode
    }

    pub fn signal(&self) -> Result<(), SyncError> {
        let mut signaled = self.signaled.synchronized()?;
        *signaled = true;
        match self.mode {
            EventMode::AutoReset => signaled.notify_one(),
            EventMode::ManualReset => signaled.notify_all(),
        };
        Ok(())
    }

    pub fn reset(&self) -> Result<(), SyncError> {
        *self.signaled.synchronized()? = false;
        Ok(())
    }

    pub fn wait(&self) -> Result<(), SyncError> {
        let mut signaled = self.signaled.synchronized()?;
        signaled.wait_while(|s| !*s)?;
        if self.mode == EventMode::AutoReset {
            *signaled = false;
        }
        Ok(())
    }

    /// Returns `false` if the event was not signaled within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool, SyncError> {
        let mut signaled = self.signaled.synchronized()?;
        if signaled.wait_timeout_while(timeout, |s| !*s)? == WaitStatus::TimedOut {
            return Ok(false);
        }
        if self.mode == EventMode::AutoReset {
            *signaled = false;
        }
        Ok(true)
    }

    pub fn is_signaled(&self) -> Result<bool, SyncError> {
        Ok(*self.signaled.synchronized()?)
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_manual_reset_stays_signaled() {
        let event = Event::new(EventMode::ManualReset, false);
        assert!(!event.is_signaled().unwrap());
        event.signal().unwrap();
        event.wait().unwrap();
        assert!(event.wait_timeout(Duration::from_millis(1)).unwrap());
        assert!(event.is_signaled().unwrap());
        event.reset().unwrap();
        assert!(!event.wait_timeout(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn test_auto_reset_consumed_once() {
        let event = Event::new(EventMode::AutoReset, true);
        event.wait().unwrap();
        assert!(!event.is_signaled().unwrap());
        assert!(!event.wait_timeout(Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn test_manual_signal_releases_all_waiters() {
        let event = Arc::new(Event::new(EventMode::ManualReset, false));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let event = Arc::clone(&event);
                thread::spawn(move || event.wait().unwrap())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        event.signal().unwrap();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_auto_signal_releases_one_waiter() {
        for backend in [BackendKind::Portable, BackendKind::Parking] {
            let event = Arc::new(Event::with_backend(EventMode::AutoReset, false, backend));
            let released = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let (event, released) = (Arc::clone(&event), Arc::clone(&released));
                    thread::spawn(move || {
                        if event.wait_timeout(Duration::from_millis(200)).unwrap() {
                            released.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            thread::sleep(Duration::from_millis(20));
            event.signal().unwrap();
            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(released.load(Ordering::SeqCst), 1);
            assert!(!event.is_signaled().unwrap());
        }
    }
}
