//!
//! weft-threads - Threads and the Task Manager
//!
//! The execution layer on top of weft-sync:
//!
//! - `runnable` - the `Runnable` trait, `Task` handles and closure adapters
//! - `thread` - a thin portable thread wrapper with join/detach
//! - `queue` - the prioritized FIFO of pending jobs
//! - `periodic` - periodic and delayed registrations, driven by a timer thread
//! - `manager` - the worker pool tying it together
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use weft_core::PoolConfig;
//! use weft_threads::{TaskManager, task};
//!
//! let manager = TaskManager::new(PoolConfig::default().with_workers(4));
//! manager.start().unwrap();
//! manager.submit(task(|| println!("hello from a worker"))).unwrap();
//! let tick = manager
//!     .schedule_periodic(task(|| println!("tick")), Duration::from_millis(100))
//!     .unwrap();
//! std::thread::sleep(Duration::from_millis(350));
//! manager.cancel(&tick).unwrap();
//! let report = manager.stop(true).unwrap();
//! assert_eq!(report.dropped, 0);
//! ```
//!

pub mod manager;
pub mod periodic;
pub mod queue;
pub mod runnable;
pub mod thread;

pub use manager::{ManagerState, PoolStats, StopReport, TaskManager};
pub use periodic::PeriodicHandle;
pub use queue::Priority;
pub use runnable::{Runnable, Task, once, task};
pub use thread::{Thread, ThreadBuilder, current_thread_id, sleep, yield_now};

pub use weft_core::{TaskError, ThreadError};
