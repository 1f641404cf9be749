//! # Runtime events emitted by the scanner and service supervisors.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Scanner events**: set maintenance and scan outcomes (added, removed, failed)
//! - **Lifecycle events**: one supervised child's execution flow (starting, started, exited)
//! - **Policy events**: restart scheduling and finish-hook outcomes
//! - **Terminal events**: shutdown and fatal runtime conditions
//!
//! The [`Event`] struct carries optional metadata such as the service name,
//! child pid, exit code, backoff delay, and error text.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. This guarantees that events can be ordered correctly even
//! when delivered out-of-order through async channels.
//!
//! ## Event flow examples
//!
//! ### Healthy service
//! ```text
//! ServiceAdded
//!   → ServiceStarting
//!   → ServiceStarted (pid)
//! ```
//!
//! ### Crash and restart
//! ```text
//! ServiceExited (code)
//!   → [finish hook, if present]
//!   → BackoffScheduled (delay)
//!   → ServiceStarting
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Scanner events ===
    /// A new service directory was discovered and added to the live set.
    ServiceAdded,
    /// A service was dropped from the live set (directory vanished or close completed).
    ServiceRemoved,
    /// A scan pass failed for a transient reason; the live set is unchanged.
    ScanFailed,

    // === Service lifecycle events ===
    /// A supervised child is about to be spawned.
    ServiceStarting,
    /// A supervised child was spawned.
    ServiceStarted,
    /// A supervised child exited.
    ServiceExited,
    /// Spawning a child failed; the service stays stopped and backs off.
    SpawnFailed,
    /// The service reached the Down state and will not be restarted.
    ServiceDown,

    // === Policy events ===
    /// A restart was scheduled after a backoff delay.
    BackoffScheduled,
    /// A finish hook did not exit within its bounded wait and was killed.
    FinishTimedOut,

    // === Terminal events ===
    /// Orderly shutdown was requested (close event or exit command).
    ShutdownRequested,
    /// The singleton lock for the scan directory is held by another process.
    LockDenied,
    /// The wait loop hit a non-timeout failure and is stopping.
    MuxFailed,
}

/// Runtime event with optional metadata.
///
/// Carries information about the service, child pid, exit code, backoff
/// delay, and failure text where relevant.
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Name of the service, if applicable ("name" or "name/log").
    pub service: Option<String>,
    /// Child process id (if relevant).
    pub pid: Option<u32>,
    /// Child exit code (if relevant).
    pub code: Option<i32>,
    /// Backoff delay before the next start (if relevant).
    pub delay: Option<Duration>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            pid: None,
            code: None,
            delay: None,
            error: None,
        }
    }

    /// Attaches a service name.
    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.service = Some(name.into());
        self
    }

    /// Attaches a child pid.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an exit code.
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = Some(code);
        self
    }

    /// Attaches a backoff delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }
}
