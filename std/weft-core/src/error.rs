//!
//! Error types for the weft crates.
//!
//! Three classes of failure, reported through `kind()`:
//! - usage errors: a caller broke a primitive's contract (`SyncError`)
//! - resource exhaustion: the OS refused a thread (`ThreadError`)
//! - state errors: the task manager is not in a state that allows the call
//!   (`TaskError`)
//!

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::id::ThreadId;

/// Broad classification shared by every weft error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    ResourceExhausted,
    State,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("{primitive} unlocked by thread {caller}, which does not own it")]
    NotOwner {
        primitive: &'static str,
        caller: ThreadId,
    },

    #[error("{primitive} is already held by the calling thread {caller}")]
    WouldDeadlock {
        primitive: &'static str,
        caller: ThreadId,
    },

    #[error("condition wait requires the associated {primitive} to be held by the caller")]
    LockNotHeld { primitive: &'static str },

    #[error("cannot wait on a recursive mutex held {depth} times")]
    RecursiveWait { depth: usize },

    #[error("read lock cannot be upgraded to a write lock")]
    UpgradeUnsupported,

    #[error("read lock released by thread {caller}, which holds none")]
    ReadNotHeld { caller: ThreadId },

    #[error("barrier needs at least one participant")]
    InvalidParticipants,

    #[error("semaphore permit count would overflow")]
    PermitOverflow,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Usage
    }
}

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("could not allocate thread resources: {0}")]
    ResourceExhausted(#[source] io::Error),

    #[error("native threads are not available on this platform")]
    Unsupported,

    #[error("thread {id} panicked: {message}")]
    Panicked { id: ThreadId, message: String },
}

impl ThreadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ThreadError::ResourceExhausted(_) | ThreadError::Unsupported => {
                ErrorKind::ResourceExhausted
            }
            ThreadError::Panicked { .. } => ErrorKind::State,
        }
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task rejected: manager is {state}")]
    Rejected { state: &'static str },

    #[error("task rejected: queue is full ({limit} pending)")]
    QueueFull { limit: usize },

    #[error("no periodic registration with id {id}")]
    NotFound { id: u64 },

    #[error("task manager is {found}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("worker count must be at least 1")]
    InvalidWorkerCount,

    #[error("interval must be greater than zero")]
    InvalidInterval,

    #[error("stop called from worker thread {caller}")]
    StopFromWorker { caller: ThreadId },

    #[error(transparent)]
    Thread(#[from] ThreadError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Thread(err) => err.kind(),
            TaskError::Sync(err) => err.kind(),
            TaskError::InvalidWorkerCount
            | TaskError::InvalidInterval
            | TaskError::StopFromWorker { .. } => ErrorKind::Usage,
            TaskError::Rejected { .. }
            | TaskError::QueueFull { .. }
            | TaskError::NotFound { .. }
            | TaskError::InvalidState { .. } => ErrorKind::State,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
