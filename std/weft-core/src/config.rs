//!
//! # Pool Configuration
//!
//! `PoolConfig` describes how a task manager and the primitives it builds
//! are set up. Every field has a default, so an empty file is a valid
//! config.
//!
//! ## Example weft.toml
//!
//! ```toml
//! workers = 8
//! thread_name = "ingest"
//! backend = "parking"
//! rw_policy = { reader-batch = 16 }
//! spin_limit = 200
//! drain_on_drop = false
//! max_queued = 10000
//! ```
//!

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::platform::{BackendKind, Capabilities, cpu_count};

/// Backend requested by configuration; `Auto` defers to the capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendChoice {
    #[default]
    Auto,
    Portable,
    Parking,
}

impl BackendChoice {
    pub fn resolve(self, caps: &Capabilities) -> BackendKind {
        match self {
            BackendChoice::Auto => BackendKind::resolve(caps),
            BackendChoice::Portable => BackendKind::Portable,
            BackendChoice::Parking => BackendKind::Parking,
        }
    }
}

/// How a read/write mutex arbitrates between readers and waiting writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RwPolicy {
    /// New readers wait as soon as any writer is waiting.
    #[default]
    WriterPreferred,
    /// Up to `n` readers are admitted past a waiting writer, then readers
    /// wait until a writer has had its turn.
    ReaderBatch(usize),
    /// Readers never wait for writers. Writers can starve.
    ReaderPreferred,
}

impl RwPolicy {
    /// Whether a new reader may pass a waiting writer, given how many
    /// readers already did so since the writer started waiting.
    pub fn admits_reader(self, admitted_past_writer: usize) -> bool {
        match self {
            RwPolicy::WriterPreferred => false,
            RwPolicy::ReaderBatch(limit) => admitted_past_writer < limit,
            RwPolicy::ReaderPreferred => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Worker threads; `None` uses the CPU count.
    pub workers: Option<usize>,
    /// Prefix for worker thread names.
    pub thread_name: String,
    pub stack_size: Option<usize>,
    pub backend: BackendChoice,
    pub rw_policy: RwPolicy,
    /// `try_lock` attempts an adaptive mutex makes before blocking.
    pub spin_limit: u32,
    /// Drain queued work when a running manager is dropped.
    pub drain_on_drop: bool,
    /// Pending-task limit; `None` is unbounded.
    pub max_queued: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: None,
            thread_name: "weft-worker".to_string(),
            stack_size: None,
            backend: BackendChoice::Auto,
            rw_policy: RwPolicy::WriterPreferred,
            spin_limit: 100,
            drain_on_drop: true,
            max_queued: None,
        }
    }
}

impl PoolConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: PoolConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if self.thread_name.is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".to_string()));
        }
        if self.stack_size == Some(0) {
            return Err(ConfigError::Invalid("stack_size must be positive".to_string()));
        }
        if self.max_queued == Some(0) {
            return Err(ConfigError::Invalid("max_queued must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Worker count to start with: the configured value or the CPU count.
    pub fn resolved_workers(&self) -> usize {
        self.workers.unwrap_or_else(cpu_count).max(1)
    }

    pub fn resolved_backend(&self, caps: &Capabilities) -> BackendKind {
        self.backend.resolve(caps)
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_backend(mut self, backend: BackendChoice) -> Self {
        self.backend = backend;
        self
    }
}
