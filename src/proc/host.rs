//! Production launcher backed by `tokio::process`.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::watch;

use crate::error::SpawnError;
use crate::mux::{SignalEvent, WaitHandle};
use crate::proc::{ChildHandle, ChildSpec, Launcher};

/// Spawns recipes through `sh -c` and reports exits through a monitor task.
///
/// Each child runs in its own process group so that graceful and forced
/// termination reach the whole recipe, not just the shell.
pub struct TokioLauncher;

impl Launcher for TokioLauncher {
    fn spawn(&self, spec: ChildSpec) -> Result<Box<dyn ChildHandle>, SpawnError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&spec.command)
            .arg("run")
            .args(&spec.args)
            .current_dir(&spec.dir)
            .process_group(0)
            .stdin(spec.stdin.into_stdio())
            .stdout(spec.stdout.into_stdio())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|source| SpawnError::Os { source })?;
        let pid = child.id();

        let exited = SignalEvent::new();
        let (code_tx, code_rx) = watch::channel(None);
        let event = exited.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => exit_code_of(status),
                Err(_) => -1,
            };
            // The code must be readable before the handle signals.
            let _ = code_tx.send(Some(code));
            event.set();
        });

        Ok(Box::new(HostChild {
            pid,
            exited,
            code: code_rx,
        }))
    }
}

struct HostChild {
    pid: Option<u32>,
    exited: SignalEvent,
    code: watch::Receiver<Option<i32>>,
}

impl HostChild {
    fn signal_group(&self, sig: Signal) {
        if let Some(pid) = self.pid {
            let _ = killpg(Pid::from_raw(pid as i32), sig);
        }
    }
}

impl ChildHandle for HostChild {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn wait_handle(&self) -> WaitHandle {
        self.exited.handle()
    }

    fn exit_code(&self) -> Option<i32> {
        *self.code.borrow()
    }

    fn terminate(&self) {
        self.signal_group(Signal::SIGTERM);
    }

    fn kill(&self) {
        self.signal_group(Signal::SIGKILL);
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}
