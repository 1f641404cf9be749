//! # servitor
//!
//! **Servitor** keeps a tree of service directories alive. Every
//! subdirectory of the scan directory that holds a `run` recipe is
//! supervised as a long-running child: spawned, observed, restarted with
//! backoff when it dies, optionally piped into a companion `log/` service,
//! and shut down in order when the close event fires.
//!
//! ## Features
//!
//! | Area            | Description                                                     | Key types / traits                       |
//! |-----------------|-----------------------------------------------------------------|------------------------------------------|
//! | **Wait loop**   | Single-threaded callback loop over handles, timers, stop.       | [`WaitMux`], [`MuxHandle`], [`WaitHandle`] |
//! | **Scanning**    | Diff on-disk service directories against the live set.          | [`SvScan`], [`Config`]                   |
//! | **Supervision** | Per-child state machine with finish hooks and backoff.          | [`ServiceProcess`], [`Service`]          |
//! | **Policies**    | Restart delay growth and jitter.                                | [`BackoffPolicy`], [`JitterPolicy`]      |
//! | **OS shim**     | Injected spawner for children; mockable in tests.               | [`Launcher`], [`ChildHandle`]            |
//! | **Observability** | Sequence-numbered events on a broadcast bus.                  | [`Event`], [`Bus`], [`Observer`]         |
//! | **Exclusion**   | One scanner per tree, keyed by the canonical path.              | [`DirLock`]                              |
//!
//! ## Service directory layout
//!
//! ```text
//! scan-dir/
//!   env/VAR            first line sets VAR; empty file unsets it
//!   .servitor/finish   top-level recipe run at orderly exit
//!   myservice/
//!     run              required recipe; spawned and kept alive
//!     finish           optional hook, receives the exit code
//!     down             optional marker: start in the Down state
//!     log/
//!       run            logger; its stdin is the service's stdout
//! ```

mod cli;
mod config;
mod error;
mod events;
mod lock;
mod mux;
mod observers;
mod policies;
mod proc;
mod scan;
mod signal;
mod svc;

// ---- Public re-exports ----

pub use cli::{Args, run as run_cli};
pub use config::Config;
pub use error::{EXIT_LOCKED, EXIT_MUX, EXIT_OK, EXIT_SCAN_DIR, RuntimeError, SpawnError};
pub use events::{Bus, Event, EventKind};
pub use lock::DirLock;
pub use mux::{MuxHandle, SignalEvent, WaitHandle, WaitMux};
pub use observers::{LogWriter, Observer};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use proc::{ChildHandle, ChildSpec, Launcher, ServicePipes, StdioSpec, TokioLauncher};
pub use scan::{CTL_DIR, ENV_DIR, SvScan};
pub use signal::forward_shutdown_signals;
pub use svc::{
    DOWN_FILE, FINISH_FILE, LOG_DIR, ProcState, RUN_FILE, RestartFn, Service, ServiceProcess,
};
