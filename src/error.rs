//! # Error types used by the scanner runtime and child spawning.
//!
//! This module defines two main error enums:
//!
//! - [`RuntimeError`] fatal conditions raised by the scanner itself; each
//!   maps to the process exit code it is reported with.
//! - [`SpawnError`] failures to bring up one child; absorbed by the owning
//!   supervisor (logged, backed off) and never fatal to siblings.
//!
//! Both types provide an `as_label` helper for stable log labels.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Exit code for a normal, orderly stop.
pub const EXIT_OK: i32 = 0;
/// Exit code when the scan directory is absent or cannot be entered.
pub const EXIT_SCAN_DIR: i32 = 100;
/// Exit code when another scanner holds the lock for the scan directory.
pub const EXIT_LOCKED: i32 = 111;
/// Exit code for a non-timeout wait-loop failure.
pub const EXIT_MUX: i32 = 125;

/// # Fatal conditions raised by the scanner runtime.
///
/// These are reported once on the event bus and then stop the wait loop
/// with the matching exit code.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The scan directory does not exist or could not be entered.
    #[error("scan directory {path:?} is missing or unreadable: {source}")]
    ScanDirUnavailable {
        /// The configured scan directory.
        path: PathBuf,
        /// The underlying filesystem error.
        source: io::Error,
    },

    /// Another live scanner already manages this directory.
    #[error("scan directory {path:?} is locked by another scanner")]
    LockHeld {
        /// The configured scan directory.
        path: PathBuf,
    },

    /// The wait loop observed an impossible handle state.
    #[error("wait loop failure: {reason}")]
    MuxFailure {
        /// Description of the broken invariant.
        reason: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::ScanDirUnavailable { .. } => "scan_dir_unavailable",
            RuntimeError::LockHeld { .. } => "lock_held",
            RuntimeError::MuxFailure { .. } => "mux_failure",
        }
    }

    /// Returns the process exit code this condition stops the loop with.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuntimeError::ScanDirUnavailable { .. } => EXIT_SCAN_DIR,
            RuntimeError::LockHeld { .. } => EXIT_LOCKED,
            RuntimeError::MuxFailure { .. } => EXIT_MUX,
        }
    }
}

/// # Failures to spawn one supervised child.
///
/// Absorbed at the owning [`ServiceProcess`](crate::ServiceProcess):
/// the service stays stopped, its backoff advances, siblings are unaffected.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The `run` (or `finish`) recipe file could not be read.
    #[error("recipe {path:?} is missing or unreadable: {source}")]
    Recipe {
        /// Path of the missing recipe.
        path: PathBuf,
        /// The underlying filesystem error.
        source: io::Error,
    },

    /// The OS refused to create the child process.
    #[error("failed to spawn child: {source}")]
    Os {
        /// The underlying spawn error.
        source: io::Error,
    },
}

impl SpawnError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::Recipe { .. } => "spawn_recipe",
            SpawnError::Os { .. } => "spawn_os",
        }
    }
}
