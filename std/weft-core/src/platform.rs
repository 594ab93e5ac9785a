//! Platform capabilities and backend selection.
//!
//! The capability vector is resolved once from the compilation target and
//! then passed around as a plain value. Nothing else in the workspace
//! branches on the target directly.

use std::fmt;
use std::thread;

/// What the host platform offers to the primitive layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub has_native_threads: bool,
    pub monotonic_clock_available: bool,
    pub has_nanosleep: bool,
}

impl Capabilities {
    /// Capabilities of the platform this crate was compiled for.
    pub const fn detect() -> Self {
        let native = cfg!(any(unix, windows));
        Self {
            has_native_threads: native && !cfg!(target_family = "wasm"),
            monotonic_clock_available: native,
            has_nanosleep: cfg!(unix),
        }
    }

    /// A platform with nothing but a single thread of execution.
    pub const fn minimal() -> Self {
        Self {
            has_native_threads: false,
            monotonic_clock_available: false,
            has_nanosleep: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}

/// Number of CPUs available to this process, at least 1.
pub fn cpu_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Which implementation backs the raw locks and wait queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// `std::sync::Mutex` + `std::sync::Condvar`.
    Portable,
    /// `parking_lot` raw mutex and condition variable.
    Parking,
}

impl BackendKind {
    /// Picks the backend best suited to `caps`.
    ///
    /// The parking backend relies on native thread parking and timed waits
    /// against a monotonic clock; anything less falls back to the portable one.
    pub const fn resolve(caps: &Capabilities) -> Self {
        if caps.has_native_threads && caps.monotonic_clock_available {
            BackendKind::Parking
        } else {
            BackendKind::Portable
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            BackendKind::Portable => "portable",
            BackendKind::Parking => "parking",
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::resolve(&Capabilities::detect())
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_count_is_positive() {
        assert!(cpu_count() >= 1);
    }

    #[test]
    fn test_resolve_prefers_parking_on_native() {
        let caps = Capabilities {
            has_native_threads: true,
            monotonic_clock_available: true,
            has_nanosleep: true,
        };
        assert_eq!(BackendKind::resolve(&caps), BackendKind::Parking);
    }

    #[test]
    fn test_resolve_falls_back_to_portable() {
        assert_eq!(
            BackendKind::resolve(&Capabilities::minimal()),
            BackendKind::Portable
        );

        let no_clock = Capabilities {
            has_native_threads: true,
            monotonic_clock_available: false,
            has_nanosleep: true,
        };
        assert_eq!(BackendKind::resolve(&no_clock), BackendKind::Portable);
    }

    #[test]
    fn test_detect_on_host() {
        let caps = Capabilities::detect();
        assert!(caps.has_native_threads);
        assert!(caps.monotonic_clock_available);
    }
}
