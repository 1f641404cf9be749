//! # Single-threaded wait loop.
//!
//! [`WaitMux`] serializes every callback the runtime runs (init, timers,
//! handle triggers, stop) onto one thread, so components never see
//! re-entrancy and share state through plain `Rc<RefCell<…>>`.
//!
//! # High-level architecture
//!
//! ```text
//!            ┌────────────────────────────┐
//!            │          WaitMux           │
//!            │  init │ timers │ triggers  │
//!            └──────────────┬─────────────┘
//!                     select! over
//!          ┌────────────────┼────────────────┐
//!          ▼                ▼                ▼
//!    command queue    nearest timer    signaled handle
//!    (MuxHandle)      (sleep_until)    (watch channels)
//! ```
//!
//! ## Rules
//! - Init callbacks run once when [`WaitMux::run`] is entered, in
//!   registration order.
//! - Per iteration, due timers fire before handle triggers; triggers for one
//!   handle fire in registration order.
//! - Triggered callbacks are **one-shot**: a callback fires once when its
//!   handle is signaled and is then unregistered. Re-register from inside
//!   the callback to observe the handle again.
//! - Registrations and [`MuxHandle::stop`] issued from inside a callback are
//!   queued commands, applied between dispatches (visible next iteration).
//! - `stop` is idempotent; the first code wins. Stop callbacks run in
//!   registration order, then the loop returns the code. Pending timers and
//!   triggers never fire after that.
//! - A watch channel that closes while unsignaled is an invariant violation:
//!   the loop reports it on the bus and stops with the mux failure code.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};

/// Ids for wait handles; never reused within a process.
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A waitable handle: becomes (and stays) signaled exactly once.
///
/// Cheap to clone; clones observe the same underlying event.
#[derive(Clone)]
pub struct WaitHandle {
    id: u64,
    rx: watch::Receiver<bool>,
}

impl WaitHandle {
    /// Stable id of the underlying event, used to address registrations.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns whether the handle is currently signaled.
    pub fn is_signaled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// The settable side of a [`WaitHandle`].
///
/// Manual-reset semantics: once [`SignalEvent::set`] has been called the
/// handle stays signaled for every observer.
#[derive(Clone)]
pub struct SignalEvent {
    tx: Arc<watch::Sender<bool>>,
    handle: WaitHandle,
}

impl SignalEvent {
    /// Creates a new, unsignaled event.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        let id = NEXT_HANDLE_ID.fetch_add(1, AtomicOrdering::Relaxed);
        Self {
            tx: Arc::new(tx),
            handle: WaitHandle { id, rx },
        }
    }

    /// Signals the event. Idempotent.
    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    /// Returns whether the event has been signaled.
    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Returns a waitable handle onto this event.
    pub fn handle(&self) -> WaitHandle {
        self.handle.clone()
    }
}

impl Default for SignalEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Callback invoked once at loop start or loop stop.
pub type HookFn = Box<dyn FnOnce(&MuxHandle)>;
/// Callback invoked once when its handle becomes signaled.
pub type TriggerFn = Box<dyn FnOnce(&MuxHandle, &WaitHandle)>;
/// Callback invoked once when its deadline passes.
pub type TimerFn = Box<dyn FnOnce(&MuxHandle)>;

enum Cmd {
    Trigger(WaitHandle, TriggerFn),
    Timeout(Instant, TimerFn),
    RemoveTriggers(u64),
    Stop(i32),
}

/// Handle for scheduling work on a running [`WaitMux`].
///
/// Everything goes through a command queue; effects become visible on the
/// loop's next iteration, which is what makes re-entrant use from inside a
/// callback safe.
#[derive(Clone)]
pub struct MuxHandle {
    tx: mpsc::UnboundedSender<Cmd>,
}

impl MuxHandle {
    /// Registers `f` to fire once when `handle` is signaled.
    ///
    /// Multiple callbacks on the same handle all fire, in registration order.
    pub fn add_trigger(&self, handle: WaitHandle, f: impl FnOnce(&MuxHandle, &WaitHandle) + 'static) {
        let _ = self.tx.send(Cmd::Trigger(handle, Box::new(f)));
    }

    /// Registers `f` to fire once when the current time reaches `deadline`.
    pub fn add_timeout(&self, deadline: Instant, f: impl FnOnce(&MuxHandle) + 'static) {
        let _ = self.tx.send(Cmd::Timeout(deadline, Box::new(f)));
    }

    /// Unregisters every trigger callback waiting on the handle with `id`.
    pub fn remove_triggers(&self, id: u64) {
        let _ = self.tx.send(Cmd::RemoveTriggers(id));
    }

    /// Requests the loop to stop with `code`. Idempotent; the first call wins.
    pub fn stop(&self, code: i32) {
        let _ = self.tx.send(Cmd::Stop(code));
    }
}

struct TriggerEntry {
    handle: WaitHandle,
    cb: TriggerFn,
}

struct TimerEntry {
    deadline: Instant,
    seq: u64,
    cb: TimerFn,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

enum Wake {
    Command,
    Timer,
    Signaled(u64),
    Broken(u64),
}

/// The wait loop. See the module docs for the dispatch rules.
pub struct WaitMux {
    bus: Bus,
    init: Vec<HookFn>,
    stop_cbs: Vec<HookFn>,
    triggers: Vec<TriggerEntry>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    timer_seq: u64,
    stop_code: Option<i32>,
    tx: mpsc::UnboundedSender<Cmd>,
    rx: mpsc::UnboundedReceiver<Cmd>,
}

impl WaitMux {
    /// Creates an empty loop that reports failures on `bus`.
    pub fn new(bus: Bus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            bus,
            init: Vec::new(),
            stop_cbs: Vec::new(),
            triggers: Vec::new(),
            timers: BinaryHeap::new(),
            timer_seq: 0,
            stop_code: None,
            tx,
            rx,
        }
    }

    /// Returns a handle for scheduling work on the loop.
    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            tx: self.tx.clone(),
        }
    }

    /// Registers an init callback, run once when [`WaitMux::run`] is entered.
    pub fn add_init(&mut self, f: impl FnOnce(&MuxHandle) + 'static) {
        self.init.push(Box::new(f));
    }

    /// Registers a stop callback, run once after the first
    /// [`MuxHandle::stop`] is observed.
    pub fn add_stop(&mut self, f: impl FnOnce(&MuxHandle) + 'static) {
        self.stop_cbs.push(Box::new(f));
    }

    /// Runs the loop to completion and returns the stop code.
    pub async fn run(mut self) -> i32 {
        let handle = self.handle();

        self.drain_cmds();
        for f in std::mem::take(&mut self.init) {
            f(&handle);
        }

        loop {
            self.drain_cmds();
            if let Some(code) = self.stop_code {
                for f in std::mem::take(&mut self.stop_cbs) {
                    f(&handle);
                }
                // Anything queued by the stop callbacks is cancelled.
                return code;
            }

            match self.wait_once().await {
                Wake::Command => {}
                Wake::Timer => self.fire_due_timers(&handle),
                Wake::Signaled(id) => self.fire_triggers(id, &handle),
                Wake::Broken(id) => self.on_broken_handle(id),
            }
        }
    }

    /// Blocks until a command arrives, a timer is due, or a handle signals.
    async fn wait_once(&mut self) -> Wake {
        let deadline = self.timers.peek().map(|Reverse(t)| t.deadline);
        let waiters: Vec<_> = self
            .triggers
            .iter()
            .map(|t| {
                let mut rx = t.handle.rx.clone();
                let id = t.handle.id;
                Box::pin(async move {
                    match rx.wait_for(|signaled| *signaled).await {
                        Ok(_) => Wake::Signaled(id),
                        Err(_) => Wake::Broken(id),
                    }
                })
            })
            .collect();

        let timer = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => pending::<()>().await,
            }
        };
        let signaled = async move {
            if waiters.is_empty() {
                pending::<Wake>().await
            } else {
                let (wake, _, _) = futures::future::select_all(waiters).await;
                wake
            }
        };

        enum Sel {
            Cmd(Option<Cmd>),
            Timer,
            Wake(Wake),
        }

        let sel = tokio::select! {
            biased;
            c = self.rx.recv() => Sel::Cmd(c),
            _ = timer => Sel::Timer,
            w = signaled => Sel::Wake(w),
        };

        match sel {
            Sel::Cmd(Some(cmd)) => {
                self.apply(cmd);
                Wake::Command
            }
            // The loop holds its own sender, so the queue cannot close.
            Sel::Cmd(None) => Wake::Command,
            Sel::Timer => Wake::Timer,
            Sel::Wake(w) => w,
        }
    }

    fn drain_cmds(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            self.apply(cmd);
        }
    }

    fn apply(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::Trigger(handle, cb) => self.triggers.push(TriggerEntry { handle, cb }),
            Cmd::Timeout(deadline, cb) => {
                self.timer_seq += 1;
                self.timers.push(Reverse(TimerEntry {
                    deadline,
                    seq: self.timer_seq,
                    cb,
                }));
            }
            Cmd::RemoveTriggers(id) => self.triggers.retain(|t| t.handle.id != id),
            Cmd::Stop(code) => {
                self.stop_code.get_or_insert(code);
            }
        }
    }

    /// Fires every timer whose deadline has passed, in deadline order.
    fn fire_due_timers(&mut self, handle: &MuxHandle) {
        let now = Instant::now();
        loop {
            match self.timers.peek() {
                Some(Reverse(top)) if top.deadline <= now => {}
                _ => break,
            }
            let Some(Reverse(entry)) = self.timers.pop() else {
                break;
            };
            (entry.cb)(handle);
        }
    }

    /// Fires (and unregisters) every trigger waiting on handle `id`.
    fn fire_triggers(&mut self, id: u64, handle: &MuxHandle) {
        let mut fired = Vec::new();
        let mut i = 0;
        while i < self.triggers.len() {
            if self.triggers[i].handle.id == id {
                fired.push(self.triggers.remove(i));
            } else {
                i += 1;
            }
        }
        for t in fired {
            (t.cb)(handle, &t.handle);
        }
    }

    fn on_broken_handle(&mut self, id: u64) {
        let err = RuntimeError::MuxFailure {
            reason: format!("wait handle {id} closed while unsignaled"),
        };
        self.bus
            .publish(Event::now(EventKind::MuxFailed).with_error(err.to_string()));
        self.triggers.retain(|t| t.handle.id != id);
        self.stop_code.get_or_insert(err.exit_code());
    }
}
