//! # Directory scanner and service-set orchestrator.
//!
//! [`SvScan`] owns the live set of [`Service`]s for one scan directory. Its
//! init callback enters the directory, takes the singleton lock, applies
//! `env/` overrides, performs the first scan, and arms the periodic rescan
//! and the close-event trigger. Every scan diffs the on-disk directories
//! against the live set: vanished services are force-closed and dropped,
//! new ones are appended, and `check` revives whatever crashed.
//!
//! ## Rules
//! - The live vector keeps insertion order; first-seen wins, new names are
//!   appended. Entries whose name starts with `.` (and non-directories) are
//!   ignored.
//! - Scanning requires the lock; without it a scan is a no-op.
//! - The close event either stops the loop outright, or (with signals
//!   diverted) runs the orderly exit: spawn the top-level finish recipe,
//!   then stop once it exits (bounded) and let the stop callback force-close
//!   the set.

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Config;
use crate::error::{EXIT_OK, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::lock::DirLock;
use crate::mux::{MuxHandle, SignalEvent, WaitMux};
use crate::proc::{ChildHandle, ChildSpec, Launcher, StdioSpec};
use crate::svc::{FINISH_FILE, Service};

/// Hidden control directory under the scan root.
pub const CTL_DIR: &str = ".servitor";
/// Directory of environment overrides under the scan root.
pub const ENV_DIR: &str = "env";

struct ScanInner {
    cfg: Config,
    services: Vec<Rc<RefCell<Service>>>,
    lock: DirLock,
    launcher: Rc<dyn Launcher>,
    bus: Bus,
    close_event: SignalEvent,
    exiting: bool,
    // Keeps the top-level finish child owned until the loop stops.
    #[allow(dead_code)]
    finish_child: Option<Box<dyn ChildHandle>>,
}

/// The scanner. Cheap to clone; clones share the same live set.
#[derive(Clone)]
pub struct SvScan {
    inner: Rc<RefCell<ScanInner>>,
}

impl SvScan {
    /// Creates a scanner for `cfg.scan_dir`. Nothing happens until
    /// [`SvScan::register`] wires it onto a loop and the loop runs.
    pub fn new(cfg: Config, launcher: Rc<dyn Launcher>, bus: Bus, close_event: SignalEvent) -> Self {
        let lock = DirLock::for_dir(&cfg.scan_dir);
        Self {
            inner: Rc::new(RefCell::new(ScanInner {
                cfg,
                services: Vec::new(),
                lock,
                launcher,
                bus,
                close_event,
                exiting: false,
                finish_child: None,
            })),
        }
    }

    /// Registers the init callback and the stop callback that force-closes
    /// the set.
    pub fn register(&self, mux: &mut WaitMux) {
        let inner = self.inner.clone();
        mux.add_init(move |mux| Self::do_init(&inner, mux));
        let inner = self.inner.clone();
        mux.add_stop(move |mux| Self::do_close_all(&inner, mux, true));
    }

    /// Names of the live services, in vector order.
    pub fn services(&self) -> Vec<String> {
        self.inner
            .borrow()
            .services
            .iter()
            .map(|svc| svc.borrow().name().to_string())
            .collect()
    }

    /// Runs one scan pass now. `rescan` additionally resets cached recipes.
    pub fn scan(&self, mux: &MuxHandle, rescan: bool) {
        Self::do_scan(&self.inner, mux, rescan);
    }

    /// Closes every live service and prunes those with nothing pending.
    pub fn close_all_services(&self, mux: &MuxHandle, force: bool) {
        Self::do_close_all(&self.inner, mux, force);
    }

    /// Starts the orderly exit. Idempotent.
    pub fn exit(&self, mux: &MuxHandle, immediate: bool) {
        Self::do_exit(&self.inner, mux, immediate);
    }

    fn do_init(inner: &Rc<RefCell<ScanInner>>, mux: &MuxHandle) {
        {
            let mut s = inner.borrow_mut();
            if s.lock.has_lock() {
                return;
            }
            if let Err(source) = std::env::set_current_dir(&s.cfg.scan_dir) {
                let err = RuntimeError::ScanDirUnavailable {
                    path: s.cfg.scan_dir.clone(),
                    source,
                };
                s.bus
                    .publish(Event::now(EventKind::ScanFailed).with_error(err.to_string()));
                mux.stop(err.exit_code());
                return;
            }
            if !s.lock.lock() {
                let err = RuntimeError::LockHeld {
                    path: s.cfg.scan_dir.clone(),
                };
                s.bus
                    .publish(Event::now(EventKind::LockDenied).with_error(err.to_string()));
                mux.stop(err.exit_code());
                return;
            }
            read_env(&s.cfg.scan_dir, &s.bus);
        }

        Self::do_scan(inner, mux, false);

        let (period, diverted, close_handle) = {
            let s = inner.borrow();
            (
                s.cfg.rescan,
                s.cfg.signals_diverted,
                s.close_event.handle(),
            )
        };
        if period > Duration::ZERO {
            Self::arm_rescan(inner, mux, period);
        }
        let inner = inner.clone();
        mux.add_trigger(close_handle, move |mux, _| {
            if diverted {
                Self::do_exit(&inner, mux, false);
            } else {
                mux.stop(EXIT_OK);
            }
        });
    }

    /// Self-rearming periodic rescan.
    fn arm_rescan(inner: &Rc<RefCell<ScanInner>>, mux: &MuxHandle, period: Duration) {
        let inner = inner.clone();
        mux.add_timeout(Instant::now() + period, move |mux| {
            if inner.borrow().exiting {
                return;
            }
            Self::do_scan(&inner, mux, false);
            Self::arm_rescan(&inner, mux, period);
        });
    }

    fn do_scan(inner: &Rc<RefCell<ScanInner>>, mux: &MuxHandle, rescan: bool) {
        let survivors: Vec<Rc<RefCell<Service>>> = {
            let mut s = inner.borrow_mut();
            if !s.lock.has_lock() {
                return;
            }
            let names = match list_service_dirs(&s.cfg.scan_dir) {
                Ok(names) => names,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    let err = RuntimeError::ScanDirUnavailable {
                        path: s.cfg.scan_dir.clone(),
                        source: e,
                    };
                    s.bus
                        .publish(Event::now(EventKind::ScanFailed).with_error(err.to_string()));
                    mux.stop(err.exit_code());
                    return;
                }
                Err(e) => {
                    // Transient; keep the set and retry on the next pass.
                    s.bus
                        .publish(Event::now(EventKind::ScanFailed).with_error(e.to_string()));
                    return;
                }
            };

            let bus = s.bus.clone();
            s.services.retain(|svc| {
                let name = svc.borrow().name().to_string();
                if names.iter().any(|n| *n == name) {
                    true
                } else {
                    svc.borrow().close(mux, true);
                    bus.publish(Event::now(EventKind::ServiceRemoved).with_service(&name));
                    false
                }
            });

            for name in &names {
                let known = s
                    .services
                    .iter()
                    .any(|svc| svc.borrow().name() == name.as_str());
                if !known {
                    let svc = Service::create(
                        name,
                        s.cfg.scan_dir.join(name),
                        s.launcher.clone(),
                        s.bus.clone(),
                        &s.cfg,
                    );
                    s.bus
                        .publish(Event::now(EventKind::ServiceAdded).with_service(name));
                    s.services.push(svc);
                }
            }

            if rescan {
                for svc in &s.services {
                    svc.borrow().reset();
                }
            }
            s.services.clone()
        };

        for svc in &survivors {
            Service::check(svc, mux);
        }
    }

    fn do_close_all(inner: &Rc<RefCell<ScanInner>>, mux: &MuxHandle, force: bool) {
        let mut s = inner.borrow_mut();
        let bus = s.bus.clone();
        s.services.retain(|svc| {
            let flagged = svc.borrow().close(mux, force);
            if !flagged {
                bus.publish(
                    Event::now(EventKind::ServiceRemoved).with_service(svc.borrow().name()),
                );
            }
            flagged
        });
    }

    fn do_exit(inner: &Rc<RefCell<ScanInner>>, mux: &MuxHandle, immediate: bool) {
        let mut s = inner.borrow_mut();
        if s.exiting {
            if immediate {
                mux.stop(EXIT_OK);
            }
            return;
        }
        s.exiting = true;
        s.bus.publish(Event::now(EventKind::ShutdownRequested));

        let path = s.cfg.scan_dir.join(CTL_DIR).join(FINISH_FILE);
        let recipe = fs::read_to_string(&path)
            .ok()
            .filter(|r| !r.trim().is_empty());
        if let Some(command) = recipe {
            let spec = ChildSpec {
                command,
                args: Vec::new(),
                dir: s.cfg.scan_dir.clone(),
                stdin: StdioSpec::Null,
                stdout: StdioSpec::Inherit,
            };
            match s.launcher.spawn(spec) {
                Ok(child) => {
                    let handle = child.wait_handle();
                    s.finish_child = Some(child);
                    mux.add_trigger(handle, |mux, _| mux.stop(EXIT_OK));
                    // Bounded: a hung finish recipe cannot wedge the exit.
                    mux.add_timeout(Instant::now() + s.cfg.finish_timeout, |mux| {
                        mux.stop(EXIT_OK)
                    });
                    if immediate {
                        mux.stop(EXIT_OK);
                    }
                    return;
                }
                Err(e) => {
                    s.bus
                        .publish(Event::now(EventKind::SpawnFailed).with_error(e.to_string()));
                }
            }
        }
        mux.stop(EXIT_OK);
    }
}

/// Names of the service directories under `scan_dir`, sorted.
///
/// Hidden entries (leading `.`) and non-directories are ignored; per-entry
/// read errors skip the entry for this pass.
fn list_service_dirs(scan_dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(scan_dir)? {
        let Ok(entry) = entry else { continue };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let raw = entry.file_name();
        let Some(name) = raw.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }
        names.push(name.to_string());
    }
    names.sort();
    Ok(names)
}

/// Applies `env/` overrides: each file's first line sets the variable named
/// after the file; an empty file unsets it.
fn read_env(scan_dir: &Path, bus: &Bus) {
    let env_dir = scan_dir.join(ENV_DIR);
    let Ok(entries) = fs::read_dir(&env_dir) else {
        return;
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .collect();
    files.sort();

    for path in files {
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        match fs::read_to_string(&path) {
            Ok(content) => {
                let value = content.lines().next().unwrap_or("");
                if value.is_empty() {
                    unsafe { std::env::remove_var(&name) };
                } else {
                    unsafe { std::env::set_var(&name, value) };
                }
            }
            Err(e) => {
                bus.publish(
                    Event::now(EventKind::ScanFailed).with_error(format!("env {name}: {e}")),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EXIT_LOCKED, EXIT_SCAN_DIR};
    use crate::proc::mock::MockLauncher;
    use crate::svc::{DOWN_FILE, RUN_FILE};
    use std::cell::Cell;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        bus: Bus,
        launcher: Rc<MockLauncher>,
        close: SignalEvent,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                root: TempDir::new().unwrap(),
                bus: Bus::new(256),
                launcher: MockLauncher::new(),
                close: SignalEvent::new(),
            }
        }

        fn add_service(&self, name: &str) {
            let dir = self.root.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(RUN_FILE), format!("exec ./{name}")).unwrap();
        }

        fn scanner(&self, rescan: Duration, signals: bool) -> (WaitMux, SvScan) {
            let cfg = Config {
                scan_dir: self.root.path().to_path_buf(),
                rescan,
                signals_diverted: signals,
                ..Config::default()
            };
            let mut mux = WaitMux::new(self.bus.clone());
            let scanner = SvScan::new(cfg, self.launcher.clone(), self.bus.clone(), self.close.clone());
            scanner.register(&mut mux);
            (mux, scanner)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_tree_stays_empty() {
        let fx = Fixture::new();
        let (mux, scanner) = fx.scanner(Duration::ZERO, false);
        let h = mux.handle();
        h.add_timeout(Instant::now() + Duration::from_millis(50), |m| m.stop(0));
        assert_eq!(mux.run().await, 0);
        assert!(scanner.services().is_empty());
        assert!(fx.launcher.spawns.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_scan_dir_stops_with_100() {
        let fx = Fixture::new();
        let cfg = Config {
            scan_dir: fx.root.path().join("absent"),
            ..Config::default()
        };
        let mut mux = WaitMux::new(fx.bus.clone());
        let scanner = SvScan::new(cfg, fx.launcher.clone(), fx.bus.clone(), fx.close.clone());
        scanner.register(&mut mux);
        assert_eq!(mux.run().await, EXIT_SCAN_DIR);
        assert!(scanner.services().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn held_lock_stops_with_111() {
        let fx = Fixture::new();
        let mut holder = DirLock::for_dir(fx.root.path());
        assert!(holder.lock());

        fx.add_service("test1");
        let (mux, scanner) = fx.scanner(Duration::ZERO, false);
        assert_eq!(mux.run().await, EXIT_LOCKED);
        // No scan happened.
        assert!(scanner.services().is_empty());
        assert!(fx.launcher.spawns.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scan_ignores_hidden_entries_and_files() {
        let fx = Fixture::new();
        fx.add_service("test1");
        fx.add_service("test2");
        fs::create_dir(fx.root.path().join(".hidden")).unwrap();
        fs::write(fx.root.path().join("notdir"), "x").unwrap();

        let (mux, scanner) = fx.scanner(Duration::ZERO, false);
        let h = mux.handle();
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let scanner = scanner.clone();
            let seen = seen.clone();
            h.add_timeout(Instant::now() + Duration::from_millis(30), move |_| {
                *seen.borrow_mut() = scanner.services();
            });
        }
        h.add_timeout(Instant::now() + Duration::from_millis(50), |m| m.stop(0));
        assert_eq!(mux.run().await, 0);

        assert_eq!(*seen.borrow(), vec!["test1", "test2"]);
        assert_eq!(fx.launcher.spawns.borrow().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rescan_appends_new_directories() {
        let fx = Fixture::new();
        fx.add_service("test1");
        fx.add_service("test2");

        let (mux, scanner) = fx.scanner(Duration::from_millis(50), false);
        let h = mux.handle();
        let root = fx.root.path().to_path_buf();
        h.add_timeout(Instant::now() + Duration::from_millis(75), move |_| {
            let dir = root.join("test3");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(RUN_FILE), "exec ./test3").unwrap();
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let scanner = scanner.clone();
            let seen = seen.clone();
            h.add_timeout(Instant::now() + Duration::from_millis(120), move |_| {
                *seen.borrow_mut() = scanner.services();
            });
        }
        h.add_timeout(Instant::now() + Duration::from_millis(130), |m| m.stop(0));
        assert_eq!(mux.run().await, 0);

        assert_eq!(*seen.borrow(), vec!["test1", "test2", "test3"]);
        // The pre-existing services were checked again by the rescans, but
        // being up they were not respawned.
        assert_eq!(fx.launcher.spawns_under("test1"), 1);
        assert_eq!(fx.launcher.spawns_under("test2"), 1);
        assert_eq!(fx.launcher.spawns_under("test3"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn two_scans_over_identical_disk_change_nothing() {
        let fx = Fixture::new();
        fx.add_service("test1");
        fx.add_service("test2");

        let (mux, scanner) = fx.scanner(Duration::ZERO, false);
        let h = mux.handle();
        let again = scanner.clone();
        h.add_timeout(Instant::now() + Duration::from_millis(20), move |m| {
            again.scan(m, false);
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let scanner = scanner.clone();
            let seen = seen.clone();
            h.add_timeout(Instant::now() + Duration::from_millis(40), move |_| {
                *seen.borrow_mut() = scanner.services();
            });
        }
        h.add_timeout(Instant::now() + Duration::from_millis(50), |m| m.stop(0));
        assert_eq!(mux.run().await, 0);

        assert_eq!(*seen.borrow(), vec!["test1", "test2"]);
        assert_eq!(fx.launcher.spawns.borrow().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_directory_is_force_closed_and_dropped() {
        let fx = Fixture::new();
        fx.add_service("test1");
        fx.add_service("test2");

        let (mux, scanner) = fx.scanner(Duration::from_millis(50), false);
        let h = mux.handle();
        let root = fx.root.path().to_path_buf();
        h.add_timeout(Instant::now() + Duration::from_millis(75), move |_| {
            fs::remove_dir_all(root.join("test2")).unwrap();
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let scanner = scanner.clone();
            let seen = seen.clone();
            h.add_timeout(Instant::now() + Duration::from_millis(120), move |_| {
                *seen.borrow_mut() = scanner.services();
            });
        }
        h.add_timeout(Instant::now() + Duration::from_millis(130), |m| m.stop(0));
        assert_eq!(mux.run().await, 0);

        assert_eq!(*seen.borrow(), vec!["test1"]);
        // test2 spawned second and was killed when its directory vanished.
        assert!(fx.launcher.child(1).killed.get());
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_prunes_in_two_phases() {
        let fx = Fixture::new();
        fx.add_service("test1");
        // test2 starts Down: nothing to close, so it drops on the first pass.
        fx.add_service("test2");
        fs::write(fx.root.path().join("test2").join(DOWN_FILE), "").unwrap();

        let (mux, scanner) = fx.scanner(Duration::ZERO, false);
        let h = mux.handle();
        let mid_len = Rc::new(Cell::new(usize::MAX));
        {
            let scanner = scanner.clone();
            h.add_timeout(Instant::now() + Duration::from_millis(20), move |m| {
                scanner.close_all_services(m, false);
            });
        }
        {
            let scanner = scanner.clone();
            let mid_len = mid_len.clone();
            h.add_timeout(Instant::now() + Duration::from_millis(30), move |_| {
                mid_len.set(scanner.services().len());
            });
        }
        h.add_timeout(Instant::now() + Duration::from_millis(50), |m| m.stop(0));
        assert_eq!(mux.run().await, 0);

        // Graceful pass kept test1 (shutdown pending) and dropped test2;
        // the stop callback's forced pass emptied the vector.
        assert_eq!(mid_len.get(), 1);
        assert!(scanner.services().is_empty());
        assert!(fx.launcher.child(0).terminated.get());
    }

    #[tokio::test(start_paused = true)]
    async fn diverted_close_event_runs_the_finish_recipe() {
        let fx = Fixture::new();
        let ctl = fx.root.path().join(CTL_DIR);
        fs::create_dir_all(&ctl).unwrap();
        fs::write(ctl.join(FINISH_FILE), "cmd").unwrap();

        let (mux, _scanner) = fx.scanner(Duration::ZERO, true);
        let h = mux.handle();
        fx.close.set();
        let still_running = Rc::new(Cell::new(false));
        {
            let still_running = still_running.clone();
            h.add_timeout(Instant::now() + Duration::from_secs(1), move |_| {
                still_running.set(true);
            });
        }
        assert_eq!(mux.run().await, 0);

        // The finish recipe was spawned, and the loop kept draining rather
        // than stopping on the spot (it stopped at the bounded wait).
        let spawns = fx.launcher.spawns.borrow();
        assert_eq!(spawns.len(), 1);
        assert_eq!(spawns[0].command, "cmd");
        assert!(still_running.get());
    }

    #[tokio::test(start_paused = true)]
    async fn undiverted_close_event_stops_at_once() {
        let fx = Fixture::new();
        let ctl = fx.root.path().join(CTL_DIR);
        fs::create_dir_all(&ctl).unwrap();
        fs::write(ctl.join(FINISH_FILE), "cmd").unwrap();

        let (mux, _scanner) = fx.scanner(Duration::ZERO, false);
        let h = mux.handle();
        fx.close.set();
        let still_running = Rc::new(Cell::new(false));
        {
            let still_running = still_running.clone();
            h.add_timeout(Instant::now() + Duration::from_secs(1), move |_| {
                still_running.set(true);
            });
        }
        assert_eq!(mux.run().await, 0);

        assert!(fx.launcher.spawns.borrow().is_empty());
        assert!(!still_running.get());
    }

    #[tokio::test(start_paused = true)]
    async fn scan_without_the_lock_is_a_no_op() {
        let fx = Fixture::new();
        fx.add_service("test1");

        let cfg = Config {
            scan_dir: fx.root.path().to_path_buf(),
            ..Config::default()
        };
        let mux = WaitMux::new(fx.bus.clone());
        // Not registered: init never runs, so the lock is never taken.
        let scanner = SvScan::new(cfg, fx.launcher.clone(), fx.bus.clone(), fx.close.clone());
        let h = mux.handle();
        {
            let scanner = scanner.clone();
            h.add_timeout(Instant::now() + Duration::from_millis(10), move |m| {
                scanner.scan(m, false);
            });
        }
        h.add_timeout(Instant::now() + Duration::from_millis(30), |m| m.stop(0));
        assert_eq!(mux.run().await, 0);

        assert!(scanner.services().is_empty());
        assert!(fx.launcher.spawns.borrow().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn env_overrides_are_applied_at_init() {
        let fx = Fixture::new();
        let env_dir = fx.root.path().join(ENV_DIR);
        fs::create_dir_all(&env_dir).unwrap();
        fs::write(env_dir.join("SERVITOR_TEST_SET"), "value\nsecond line").unwrap();
        fs::write(env_dir.join("SERVITOR_TEST_UNSET"), "").unwrap();
        unsafe { std::env::set_var("SERVITOR_TEST_UNSET", "preset") };

        let (mux, _scanner) = fx.scanner(Duration::ZERO, false);
        let h = mux.handle();
        h.add_timeout(Instant::now() + Duration::from_millis(20), |m| m.stop(0));
        assert_eq!(mux.run().await, 0);

        assert_eq!(
            std::env::var("SERVITOR_TEST_SET").as_deref(),
            Ok("value")
        );
        assert!(std::env::var("SERVITOR_TEST_UNSET").is_err());
        unsafe { std::env::remove_var("SERVITOR_TEST_SET") };
    }
}
