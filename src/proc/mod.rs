//! # OS shim: spawning and observing child processes.
//!
//! Every OS call the supervision core makes goes through the [`Launcher`]
//! and [`ChildHandle`] traits, supplied to the scanner at construction.
//! Production code injects [`TokioLauncher`]; tests inject a scripted
//! launcher and drive child exits by hand.
//!
//! A [`ChildSpec`] describes one child: the recipe text (executed through
//! `sh -c` in the service directory, in its own process group), extra
//! positional arguments, and how stdin/stdout are wired.

use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::Stdio;

use crate::error::SpawnError;
use crate::mux::WaitHandle;

mod host;
mod pipes;

#[cfg(test)]
pub(crate) mod mock;

pub use host::TokioLauncher;
pub use pipes::ServicePipes;

/// Wiring for one standard stream of a child.
#[derive(Debug)]
pub enum StdioSpec {
    /// Share the parent's stream.
    Inherit,
    /// Connect to the null device.
    Null,
    /// Connect to one end of an anonymous pipe. The fd is owned by the spec
    /// and moves into the child at spawn, so the parent's copy closes on
    /// every path, including a spawn that never happens.
    Pipe(OwnedFd),
}

impl StdioSpec {
    /// Returns whether this stream is wired to a pipe end.
    pub fn is_pipe(&self) -> bool {
        matches!(self, StdioSpec::Pipe(_))
    }

    pub(crate) fn into_stdio(self) -> Stdio {
        match self {
            StdioSpec::Inherit => Stdio::inherit(),
            StdioSpec::Null => Stdio::null(),
            StdioSpec::Pipe(fd) => Stdio::from(fd),
        }
    }
}

/// Description of one child to spawn.
#[derive(Debug)]
pub struct ChildSpec {
    /// Recipe text, passed verbatim to the spawner.
    pub command: String,
    /// Extra positional arguments (a finish hook receives the exit code).
    pub args: Vec<String>,
    /// Working directory for the child (its service directory).
    pub dir: PathBuf,
    /// Standard input wiring.
    pub stdin: StdioSpec,
    /// Standard output wiring.
    pub stdout: StdioSpec,
}

/// Spawner of supervised children.
pub trait Launcher {
    /// Spawns a child described by `spec`.
    fn spawn(&self, spec: ChildSpec) -> Result<Box<dyn ChildHandle>, SpawnError>;
}

/// A live (or exited) child as seen by its supervisor.
///
/// The handle owns the child: exactly one exists per spawn, held by the
/// supervising [`ServiceProcess`](crate::ServiceProcess) and dropped when
/// the child is gone.
pub trait ChildHandle {
    /// OS process id, if known.
    fn pid(&self) -> Option<u32>;

    /// A handle that signals when the child exits.
    fn wait_handle(&self) -> WaitHandle;

    /// The exit code, available once the wait handle has signaled.
    /// Signal deaths map to `128 + signo`.
    fn exit_code(&self) -> Option<i32>;

    /// Requests graceful termination (SIGTERM to the child's group).
    fn terminate(&self);

    /// Forcibly kills the child (SIGKILL to the child's group).
    fn kill(&self);
}
