//!
//! Thread Wrapper
//!
//! Runs a `Task` on a fresh OS thread. The thread's weft `ThreadId` is
//! reserved before the spawn so the parent can record it right away, and is
//! bound inside the child before the task starts.
//!
//! - `Thread::join` turns a panic inside the task into `ThreadError::Panicked`
//! - `Thread::detach` lets the thread run on unobserved
//! - spawn failures come back as `ThreadError::ResourceExhausted`
//!

use std::any::Any;
use std::thread::{self as std_thread, JoinHandle};
use std::time::Duration;

use weft_core::{Capabilities, ThreadError, ThreadId};

use crate::runnable::Task;

pub use weft_core::current_thread_id;

#[derive(Debug, Clone)]
pub struct ThreadBuilder {
    name: Option<String>,
    stack_size: Option<usize>,
    caps: Capabilities,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            stack_size: None,
            caps: Capabilities::detect(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Spawns against `caps` instead of the detected platform.
    pub fn capabilities(mut self, caps: Capabilities) -> Self {
        self.caps = caps;
        self
    }

    pub fn spawn(self, task: Task) -> Result<Thread, ThreadError> {
        if !self.caps.has_native_threads {
            return Err(ThreadError::Unsupported);
        }

        let id = ThreadId::allocate();
        let mut builder = std_thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        let handle = builder
            .spawn(move || {
                id.adopt();
                task.run();
            })
            .map_err(ThreadError::ResourceExhausted)?;

        tracing::trace!(thread = %id, name = ?self.name, "thread started");
        Ok(Thread {
            id,
            name: self.name,
            handle: Some(handle),
        })
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A started thread. Dropping it without `join` detaches it.
#[derive(Debug)]
pub struct Thread {
    id: ThreadId,
    name: Option<String>,
    handle: Option<JoinHandle<()>>,
}

impl Thread {
    /// Starts `task` on a new thread with default settings.
    pub fn start(task: Task) -> Result<Self, ThreadError> {
        ThreadBuilder::new().spawn(task)
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the thread to finish.
    pub fn join(mut self) -> Result<(), ThreadError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle.join().map_err(|payload| ThreadError::Panicked {
            id: self.id,
            message: panic_message(payload.as_ref()),
        })
    }

    pub fn detach(mut self) {
        self.handle.take();
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub fn yield_now() {
    std_thread::yield_now();
}

pub fn sleep(duration: Duration) {
    std_thread::sleep(duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::{once, task};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_child_sees_reserved_id() {
        let seen = Arc::new(AtomicU64::new(0));
        let slot = Arc::clone(&seen);
        let thread = Thread::start(task(move || {
            slot.store(current_thread_id().as_u64(), Ordering::SeqCst);
        }))
        .unwrap();

        let id = thread.id();
        thread.join().unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), id.as_u64());
        assert_ne!(id, current_thread_id());
    }

    #[test]
    fn test_named_thread() {
        let thread = ThreadBuilder::new()
            .name("weft-test")
            .stack_size(256 * 1024)
            .spawn(task(|| {
                assert_eq!(std_thread::current().name(), Some("weft-test"));
            }))
            .unwrap();
        assert_eq!(thread.name(), Some("weft-test"));
        thread.join().unwrap();
    }

    #[test]
    fn test_join_reports_panic() {
        let thread = Thread::start(once(|| panic!("boom"))).unwrap();
        let id = thread.id();
        match thread.join() {
            Err(ThreadError::Panicked { id: failed, message }) => {
                assert_eq!(failed, id);
                assert_eq!(message, "boom");
            }
            other => panic!("expected panic error, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_without_native_threads() {
        let err = ThreadBuilder::new()
            .capabilities(Capabilities::minimal())
            .spawn(task(|| {}))
            .unwrap_err();
        assert!(matches!(err, ThreadError::Unsupported));
    }

    #[test]
    fn test_detach_lets_thread_finish() {
        let done = Arc::new(AtomicU64::new(0));
        let flag = Arc::clone(&done);
        Thread::start(task(move || flag.store(1, Ordering::SeqCst)))
            .unwrap()
            .detach();

        for _ in 0..500 {
            if done.load(Ordering::SeqCst) == 1 {
                return;
            }
            sleep(Duration::from_millis(2));
        }
        panic!("detached thread never ran");
    }

    #[test]
    fn test_panic_message_formats() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let s: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(s.as_ref()), "owned");
        let s: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(s.as_ref()), "non-string panic payload");
    }
}
