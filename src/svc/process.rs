//! # Per-child supervisor state machine.
//!
//! [`ServiceProcess`] supervises exactly one recipe: it spawns the child,
//! observes its exit through the wait loop, runs the `finish` hook, and
//! schedules the next start according to the backoff policy.
//!
//! ## State machine
//!
//! ```text
//!            start()                exit trigger
//! Stopped ──────────► Starting ─► Up ──────────► Finishing
//!    ▲                                               │
//!    │__ backoff timer __ settle (desired Up) ◄──────┤
//!                                                    │
//!        Down ◄───────── settle (desired Down) ◄─────┘
//! ```
//!
//! ## Rules
//! - Exactly one child handle exists in `Up`/`Finishing`; none in
//!   `Stopped`/`Down`.
//! - The exit trigger registered on the wait loop is removed whenever the
//!   state returns to `Stopped`/`Down` (one-shot triggers plus explicit
//!   removal on force close).
//! - The finish hook runs exactly once per exit, before any subsequent
//!   start, and is bounded by the configured finish timeout.
//! - A `down` marker at construction, or a close in flight, makes the
//!   desired state Down and suppresses restarts.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Config;
use crate::error::SpawnError;
use crate::events::{Bus, Event, EventKind};
use crate::mux::MuxHandle;
use crate::policies::BackoffPolicy;
use crate::proc::{ChildHandle, ChildSpec, Launcher, StdioSpec};

/// Name of the mandatory recipe file.
pub const RUN_FILE: &str = "run";
/// Name of the optional per-exit hook recipe.
pub const FINISH_FILE: &str = "finish";
/// Presence-only marker: start in the Down state.
pub const DOWN_FILE: &str = "down";

/// Supervision states of one child recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// No child; eligible to start.
    Stopped,
    /// Spawn in progress (transient within one dispatch).
    Starting,
    /// Child is live.
    Up,
    /// Child exited; the finish hook is running.
    Finishing,
    /// No child; starts are suppressed.
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Desired {
    Up,
    Down,
}

/// Hook invoked to schedule a deferred start after `delay`.
///
/// Installed by the owning [`Service`](crate::Service) so that a
/// restart re-runs the whole pipe wiring, not a bare spawn.
pub type RestartFn = Box<dyn Fn(&MuxHandle, Duration)>;

/// State machine for one supervised child.
pub struct ServiceProcess {
    name: String,
    dir: PathBuf,
    logger: bool,
    state: ProcState,
    desired: Desired,
    run_recipe: Option<String>,
    // Outer None: not read yet. Inner None: no finish hook on disk.
    finish_recipe: Option<Option<String>>,
    child: Option<Box<dyn ChildHandle>>,
    finish_child: Option<Box<dyn ChildHandle>>,
    last_start: Option<Instant>,
    prev_delay: Option<Duration>,
    backoff: BackoffPolicy,
    stable_after: Duration,
    finish_timeout: Duration,
    launcher: Rc<dyn Launcher>,
    bus: Bus,
    restart: Option<RestartFn>,
}

impl ServiceProcess {
    /// Creates a supervisor for the recipe in `dir`.
    ///
    /// A `down` marker present at this point makes the initial state Down.
    pub fn new(
        name: String,
        dir: PathBuf,
        logger: bool,
        launcher: Rc<dyn Launcher>,
        bus: Bus,
        cfg: &Config,
    ) -> Self {
        let down_at_boot = dir.join(DOWN_FILE).exists();
        Self {
            name,
            dir,
            logger,
            state: if down_at_boot {
                ProcState::Down
            } else {
                ProcState::Stopped
            },
            desired: if down_at_boot {
                Desired::Down
            } else {
                Desired::Up
            },
            run_recipe: None,
            finish_recipe: None,
            child: None,
            finish_child: None,
            last_start: None,
            prev_delay: None,
            backoff: cfg.backoff,
            stable_after: cfg.stable_after,
            finish_timeout: cfg.finish_timeout,
            launcher,
            bus,
            restart: None,
        }
    }

    /// The supervised directory.
    pub fn service_dir(&self) -> &Path {
        &self.dir
    }

    /// Event label of this supervisor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> ProcState {
        self.state
    }

    /// Installs the deferred-restart hook.
    pub fn set_restart(&mut self, f: RestartFn) {
        self.restart = Some(f);
    }

    /// Discards cached recipes so they are re-read on the next start.
    pub fn reset(&mut self) {
        self.run_recipe = None;
        self.finish_recipe = None;
    }

    /// Brings the child up if it is not already.
    ///
    /// Idempotent while Up/Finishing; does nothing in Down. `stdin`/`stdout`
    /// carry the pipe ends when a logger is wired; unused ends close when
    /// the spec drops.
    pub fn start(this: &Rc<RefCell<Self>>, mux: &MuxHandle, stdin: StdioSpec, stdout: StdioSpec) {
        let mut p = this.borrow_mut();
        match p.state {
            ProcState::Up | ProcState::Starting | ProcState::Finishing | ProcState::Down => return,
            ProcState::Stopped => {}
        }
        if p.desired == Desired::Down {
            return;
        }

        p.state = ProcState::Starting;
        let command = match p.read_run() {
            Ok(c) => c,
            Err(e) => {
                p.spawn_failed(mux, &e);
                return;
            }
        };
        p.bus
            .publish(Event::now(EventKind::ServiceStarting).with_service(&p.name));

        let spec = ChildSpec {
            command,
            args: Vec::new(),
            dir: p.dir.clone(),
            stdin,
            stdout,
        };
        match p.launcher.spawn(spec) {
            Ok(child) => {
                let handle = child.wait_handle();
                let mut ev = Event::now(EventKind::ServiceStarted).with_service(&p.name);
                if let Some(pid) = child.pid() {
                    ev = ev.with_pid(pid);
                }
                p.bus.publish(ev);
                p.last_start = Some(Instant::now());
                p.child = Some(child);
                p.state = ProcState::Up;

                let weak = Rc::downgrade(this);
                mux.add_trigger(handle, move |mux, _| {
                    if let Some(proc_) = weak.upgrade() {
                        ServiceProcess::on_child_exit(&proc_, mux);
                    }
                });
            }
            Err(e) => p.spawn_failed(mux, &e),
        }
    }

    /// Initiates termination.
    ///
    /// Returns `false` when there is nothing to wait for (already
    /// Stopped/Down, or force-closed here), `true` when a shutdown is now
    /// in progress.
    pub fn close(&mut self, mux: &MuxHandle, force: bool) -> bool {
        match self.state {
            ProcState::Stopped | ProcState::Down => return false,
            _ => {}
        }
        self.desired = Desired::Down;

        if force {
            if let Some(child) = self.child.take() {
                mux.remove_triggers(child.wait_handle().id());
                child.kill();
            }
            if let Some(hook) = self.finish_child.take() {
                mux.remove_triggers(hook.wait_handle().id());
                hook.kill();
            }
            self.state = ProcState::Stopped;
            return false;
        }

        // A logger is not signaled on graceful close: it exits on its own
        // once the pipe from the main service drains.
        if !self.logger {
            if let Some(child) = &self.child {
                child.terminate();
            }
        }
        true
    }

    /// Exit trigger: the supervised child is gone.
    fn on_child_exit(this: &Rc<RefCell<Self>>, mux: &MuxHandle) {
        let mut p = this.borrow_mut();
        let Some(child) = p.child.take() else {
            return;
        };
        let code = child.exit_code().unwrap_or(-1);
        p.bus.publish(
            Event::now(EventKind::ServiceExited)
                .with_service(&p.name)
                .with_code(code),
        );
        p.state = ProcState::Finishing;

        if let Some(recipe) = p.read_finish() {
            let spec = ChildSpec {
                command: recipe,
                args: vec![code.to_string()],
                dir: p.dir.clone(),
                stdin: StdioSpec::Null,
                stdout: StdioSpec::Inherit,
            };
            match p.launcher.spawn(spec) {
                Ok(hook) => {
                    let handle = hook.wait_handle();
                    p.finish_child = Some(hook);

                    let weak = Rc::downgrade(this);
                    mux.add_trigger(handle, move |mux, _| {
                        if let Some(proc_) = weak.upgrade() {
                            ServiceProcess::on_finish_done(&proc_, mux);
                        }
                    });
                    let weak = Rc::downgrade(this);
                    mux.add_timeout(Instant::now() + p.finish_timeout, move |mux| {
                        if let Some(proc_) = weak.upgrade() {
                            ServiceProcess::on_finish_done(&proc_, mux);
                        }
                    });
                    return;
                }
                Err(e) => {
                    p.bus.publish(
                        Event::now(EventKind::SpawnFailed)
                            .with_service(&p.name)
                            .with_error(e.to_string()),
                    );
                }
            }
        }
        drop(p);
        Self::settle(this, mux);
    }

    /// The finish hook exited, or its bounded wait expired.
    fn on_finish_done(this: &Rc<RefCell<Self>>, mux: &MuxHandle) {
        let mut p = this.borrow_mut();
        // Taking the hook makes this idempotent: whichever of the trigger
        // and the timeout arrives second finds nothing to do.
        let Some(hook) = p.finish_child.take() else {
            return;
        };
        if hook.exit_code().is_none() {
            hook.kill();
            p.bus
                .publish(Event::now(EventKind::FinishTimedOut).with_service(&p.name));
        }
        mux.remove_triggers(hook.wait_handle().id());
        drop(p);
        Self::settle(this, mux);
    }

    /// Post-exit transition: Down, or Stopped plus a scheduled restart.
    fn settle(this: &Rc<RefCell<Self>>, mux: &MuxHandle) {
        let mut p = this.borrow_mut();
        if p.desired == Desired::Down {
            p.state = ProcState::Down;
            p.bus
                .publish(Event::now(EventKind::ServiceDown).with_service(&p.name));
            return;
        }
        p.state = ProcState::Stopped;
        p.schedule_restart(mux);
    }

    fn schedule_restart(&mut self, mux: &MuxHandle) {
        if let Some(started) = self.last_start {
            if started.elapsed() >= self.stable_after {
                // The last run was healthy long enough to forgive history.
                self.prev_delay = None;
            }
        }
        let delay = self.backoff.next(self.prev_delay);
        self.prev_delay = Some(delay);
        self.bus.publish(
            Event::now(EventKind::BackoffScheduled)
                .with_service(&self.name)
                .with_delay(delay),
        );
        if let Some(restart) = &self.restart {
            restart(mux, delay);
        }
    }

    fn spawn_failed(&mut self, mux: &MuxHandle, err: &SpawnError) {
        self.bus.publish(
            Event::now(EventKind::SpawnFailed)
                .with_service(&self.name)
                .with_error(err.to_string()),
        );
        self.state = ProcState::Stopped;
        self.schedule_restart(mux);
    }

    fn read_run(&mut self) -> Result<String, SpawnError> {
        if let Some(cached) = &self.run_recipe {
            return Ok(cached.clone());
        }
        let path = self.dir.join(RUN_FILE);
        let recipe = fs::read_to_string(&path).map_err(|source| SpawnError::Recipe {
            path: path.clone(),
            source,
        })?;
        self.run_recipe = Some(recipe.clone());
        Ok(recipe)
    }

    fn read_finish(&mut self) -> Option<String> {
        if self.finish_recipe.is_none() {
            let read = fs::read_to_string(self.dir.join(FINISH_FILE))
                .ok()
                .filter(|s| !s.trim().is_empty());
            self.finish_recipe = Some(read);
        }
        self.finish_recipe.clone().flatten()
    }
}
