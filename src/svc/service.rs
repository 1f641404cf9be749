//! # One service directory: a main supervisor plus an optional logger.
//!
//! [`Service`] composes two [`ServiceProcess`]es. When the directory has a
//! `log/` subdirectory, `check` wires the main child's stdout to the
//! logger's stdin through a fresh anonymous pipe, starting the logger
//! first so the pipe has a reader before it has a writer. Restarts are
//! funneled back through `check` so the wiring invariant also holds when
//! either side crashes.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use tokio::time::Instant;

use crate::config::Config;
use crate::events::{Bus, Event, EventKind};
use crate::mux::MuxHandle;
use crate::proc::{Launcher, ServicePipes, StdioSpec};
use crate::svc::process::{ProcState, ServiceProcess};

/// Subdirectory holding the optional logger service.
pub const LOG_DIR: &str = "log";

/// A named service directory under supervision.
pub struct Service {
    name: String,
    dir: PathBuf,
    bus: Bus,
    main: Rc<RefCell<ServiceProcess>>,
    log: Rc<RefCell<ServiceProcess>>,
}

impl Service {
    /// Builds the pair of supervisors for `dir` and installs their
    /// deferred-restart hooks.
    pub fn create(
        name: &str,
        dir: PathBuf,
        launcher: Rc<dyn Launcher>,
        bus: Bus,
        cfg: &Config,
    ) -> Rc<RefCell<Self>> {
        let main = Rc::new(RefCell::new(ServiceProcess::new(
            name.to_string(),
            dir.clone(),
            false,
            launcher.clone(),
            bus.clone(),
            cfg,
        )));
        let log = Rc::new(RefCell::new(ServiceProcess::new(
            format!("{name}/log"),
            dir.join(LOG_DIR),
            true,
            launcher,
            bus.clone(),
            cfg,
        )));
        let svc = Rc::new(RefCell::new(Service {
            name: name.to_string(),
            dir,
            bus,
            main: main.clone(),
            log: log.clone(),
        }));

        // A restart re-runs the whole check so pipes are rewired, with the
        // reader brought up before the writer.
        for proc_ in [&main, &log] {
            let weak = Rc::downgrade(&svc);
            proc_
                .borrow_mut()
                .set_restart(Box::new(move |mux: &MuxHandle, delay| {
                    let weak = weak.clone();
                    mux.add_timeout(Instant::now() + delay, move |mux| {
                        if let Some(s) = weak.upgrade() {
                            Service::check(&s, mux);
                        }
                    });
                }));
        }
        svc
    }

    /// The service name as observed on disk.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state of the main supervisor.
    pub fn main_state(&self) -> ProcState {
        self.main.borrow().state()
    }

    /// Current state of the logger supervisor.
    pub fn log_state(&self) -> ProcState {
        self.log.borrow().state()
    }

    /// Brings missing children up.
    ///
    /// Safe to call repeatedly; a child that is already Up is a no-op, and
    /// pipe ends handed to a no-op start simply drop closed.
    pub fn check(this: &Rc<RefCell<Self>>, mux: &MuxHandle) {
        let (main, log, log_dir, bus, name) = {
            let s = this.borrow();
            (
                s.main.clone(),
                s.log.clone(),
                s.dir.join(LOG_DIR),
                s.bus.clone(),
                s.name.clone(),
            )
        };

        if log_dir.is_dir() {
            match ServicePipes::create() {
                Ok(ServicePipes { reader, writer }) => {
                    ServiceProcess::start(&log, mux, StdioSpec::Pipe(reader), StdioSpec::Inherit);
                    ServiceProcess::start(&main, mux, StdioSpec::Null, StdioSpec::Pipe(writer));
                }
                Err(e) => {
                    // Transient; the next check retries with fresh pipes.
                    bus.publish(
                        Event::now(EventKind::SpawnFailed)
                            .with_service(&name)
                            .with_error(format!("pipe: {e}")),
                    );
                }
            }
        } else {
            ServiceProcess::start(&main, mux, StdioSpec::Null, StdioSpec::Inherit);
        }
    }

    /// Initiates termination of the pair.
    ///
    /// The main supervisor is closed first; the logger is force-closed when
    /// the main is already gone (or when `force` asks for it), and left to
    /// drain otherwise. Returns whether the main side still has a shutdown
    /// pending.
    pub fn close(&self, mux: &MuxHandle, force: bool) -> bool {
        let flagged = self.main.borrow_mut().close(mux, force);
        self.log.borrow_mut().close(mux, force || !flagged);
        flagged
    }

    /// Forwards a recipe-cache reset to both supervisors.
    pub fn reset(&self) {
        self.main.borrow_mut().reset();
        self.log.borrow_mut().reset();
    }
}
