//! Supervision of one service directory: the per-child state machine and
//! the main/logger pair built from it.

pub mod process;
pub mod service;

pub use process::{DOWN_FILE, FINISH_FILE, ProcState, RUN_FILE, RestartFn, ServiceProcess};
pub use service::{LOG_DIR, Service};
