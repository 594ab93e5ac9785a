//!
//! Units of work.
//!
//! A `Runnable` is anything that can be run with no arguments and no result.
//! Closures qualify through a blanket impl. Tasks are shared (`Arc`) so a
//! periodic registration can run the same one again and again.
//!

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

pub trait Runnable: Send + Sync + 'static {
    fn run(&self);
}

impl<F> Runnable for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn run(&self) {
        self()
    }
}

/// Shared handle to a runnable, as stored in queues and registrations.
pub type Task = Arc<dyn Runnable>;

/// Wraps a closure as a `Task`.
pub fn task<F>(f: F) -> Task
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Adapts a `FnOnce` closure. The first `run` consumes it; later runs do
/// nothing and log a warning.
pub fn once<F>(f: F) -> Task
where
    F: FnOnce() + Send + 'static,
{
    Arc::new(Once {
        body: Mutex::new(Some(f)),
    })
}

struct Once<F> {
    body: Mutex<Option<F>>,
}

impl<F> Runnable for Once<F>
where
    F: FnOnce() + Send + 'static,
{
    fn run(&self) {
        // Take first so the lock is not held while the body runs.
        let body = self.body.lock().take();
        match body {
            Some(f) => f(),
            None => tracing::warn!("one-shot runnable run more than once; ignoring"),
        }
    }
}

impl<F> fmt::Debug for Once<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Once")
            .field("consumed", &self.body.lock().is_none())
            .finish()
    }
}
