//! Scripted launcher for deterministic supervision tests.
//!
//! Records every [`ChildSpec`] it is asked to spawn and hands control of
//! each child's exit back to the test, mirroring how the production
//! launcher reports exits through a signaled handle.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

use tokio::sync::watch;

use crate::error::SpawnError;
use crate::mux::{SignalEvent, WaitHandle};
use crate::proc::{ChildHandle, ChildSpec, Launcher};

/// What a spawn looked like, with pipe ends reduced to flags.
#[derive(Debug, Clone)]
pub struct SpawnRecord {
    pub command: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub stdin_piped: bool,
    pub stdout_piped: bool,
}

/// Scripted state of one mock child, indexed in spawn order.
pub struct MockChild {
    exited: SignalEvent,
    code_tx: watch::Sender<Option<i32>>,
    code_rx: watch::Receiver<Option<i32>>,
    pub terminated: Cell<bool>,
    pub killed: Cell<bool>,
}

impl MockChild {
    fn new() -> Rc<Self> {
        let (code_tx, code_rx) = watch::channel(None);
        Rc::new(Self {
            exited: SignalEvent::new(),
            code_tx,
            code_rx,
            terminated: Cell::new(false),
            killed: Cell::new(false),
        })
    }

    /// Marks the child as exited with `code` and signals its handle.
    pub fn exit(&self, code: i32) {
        self.code_tx.send_replace(Some(code));
        self.exited.set();
    }
}

#[derive(Default)]
pub struct MockLauncher {
    pub spawns: RefCell<Vec<SpawnRecord>>,
    pub children: RefCell<Vec<Rc<MockChild>>>,
    /// When set, the next spawn fails once.
    pub fail_next: Cell<bool>,
}

impl MockLauncher {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of spawns whose working directory ends with `suffix`.
    pub fn spawns_under(&self, suffix: &str) -> usize {
        self.spawns
            .borrow()
            .iter()
            .filter(|s| s.dir.ends_with(suffix))
            .count()
    }

    /// The scripted child at spawn index `i`.
    pub fn child(&self, i: usize) -> Rc<MockChild> {
        self.children.borrow()[i].clone()
    }

    /// Exits the child at spawn index `i` with `code`.
    pub fn exit_child(&self, i: usize, code: i32) {
        self.child(i).exit(code);
    }
}

impl Launcher for MockLauncher {
    fn spawn(&self, spec: ChildSpec) -> Result<Box<dyn ChildHandle>, SpawnError> {
        if self.fail_next.replace(false) {
            return Err(SpawnError::Os {
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            });
        }
        self.spawns.borrow_mut().push(SpawnRecord {
            command: spec.command,
            args: spec.args,
            dir: spec.dir,
            stdin_piped: spec.stdin.is_pipe(),
            stdout_piped: spec.stdout.is_pipe(),
        });
        let child = MockChild::new();
        let pid = 1000 + self.children.borrow().len() as u32;
        self.children.borrow_mut().push(child.clone());
        Ok(Box::new(MockHandle { pid, state: child }))
    }
}

struct MockHandle {
    pid: u32,
    state: Rc<MockChild>,
}

impl ChildHandle for MockHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn wait_handle(&self) -> WaitHandle {
        self.state.exited.handle()
    }

    fn exit_code(&self) -> Option<i32> {
        *self.state.code_rx.borrow()
    }

    fn terminate(&self) {
        self.state.terminated.set(true);
    }

    fn kill(&self) {
        self.state.killed.set(true);
    }
}
