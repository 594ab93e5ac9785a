//!
//! weft-core - Shared Types for the weft Crates
//!
//! Everything the primitive layer and the threading layer need to agree on
//! lives here:
//!
//! - `platform` - capability descriptor, backend selection, CPU count
//! - `id` - process-unique thread identity used for lock ownership
//! - `error` - usage, resource and state errors
//! - `config` - pool configuration, loadable from TOML
//!

pub mod config;
pub mod error;
pub mod id;
pub mod platform;

pub use config::{BackendChoice, PoolConfig, RwPolicy};
pub use error::{ConfigError, ErrorKind, SyncError, TaskError, ThreadError};
pub use id::{ThreadId, current_thread_id};
pub use platform::{BackendKind, Capabilities, cpu_count};
