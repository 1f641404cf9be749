//! # Global runtime configuration.
//!
//! [`Config`] defines the scanner's behavior: which directory to scan, how
//! often to rescan it, how the close event is interpreted, restart backoff,
//! and the bounded waits around finish hooks.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use servitor::{BackoffPolicy, Config};
//!
//! let mut cfg = Config::default();
//! cfg.scan_dir = "/srv/services".into();
//! cfg.rescan = Duration::from_secs(5);
//! cfg.backoff = BackoffPolicy::default();
//!
//! assert!(!cfg.signals_diverted);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Global configuration for the scanner and its service supervisors.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory whose subdirectories are supervised as services.
    pub scan_dir: PathBuf,
    /// Period between automatic rescans. [`Duration::ZERO`] disables them.
    pub rescan: Duration,
    /// When set, the close event triggers an orderly exit (top-level finish
    /// recipe, natural drain) instead of an immediate stop.
    pub signals_diverted: bool,
    /// Capacity of the event bus channel.
    pub bus_capacity: usize,
    /// Restart backoff for crashing children.
    pub backoff: BackoffPolicy,
    /// A run at least this long resets the backoff to its floor.
    pub stable_after: Duration,
    /// Bounded wait for finish hooks (per-service and top-level); a hook
    /// still running after this is killed and the lifecycle proceeds.
    pub finish_timeout: Duration,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `scan_dir = "."`
    /// - `rescan = 0` (disabled)
    /// - `signals_diverted = false`
    /// - `bus_capacity = 1024`
    /// - `backoff = 1s..60s, factor 2.0`
    /// - `stable_after = 10s`
    /// - `finish_timeout = 5s`
    fn default() -> Self {
        Self {
            scan_dir: PathBuf::from("."),
            rescan: Duration::ZERO,
            signals_diverted: false,
            bus_capacity: 1024,
            backoff: BackoffPolicy::supervision(),
            stable_after: Duration::from_secs(10),
            finish_timeout: Duration::from_secs(5),
        }
    }
}
