use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::observers::Observer;

/// Base observer that logs events to stdout.
pub struct LogWriter;

#[async_trait]
impl Observer for LogWriter {
    async fn on_event(&self, e: &Event) {
        match e.kind {
            EventKind::ServiceAdded => {
                println!("[added] service={:?}", e.service);
            }
            EventKind::ServiceRemoved => {
                println!("[removed] service={:?}", e.service);
            }
            EventKind::ScanFailed => {
                println!("[scan-failed] err={:?}", e.error);
            }
            EventKind::ServiceStarting => {
                println!("[starting] service={:?}", e.service);
            }
            EventKind::ServiceStarted => {
                println!("[started] service={:?} pid={:?}", e.service, e.pid);
            }
            EventKind::ServiceExited => {
                println!("[exited] service={:?} code={:?}", e.service, e.code);
            }
            EventKind::SpawnFailed => {
                println!("[spawn-failed] service={:?} err={:?}", e.service, e.error);
            }
            EventKind::ServiceDown => {
                println!("[down] service={:?}", e.service);
            }
            EventKind::BackoffScheduled => {
                println!("[backoff] service={:?} delay={:?}", e.service, e.delay);
            }
            EventKind::FinishTimedOut => {
                println!("[finish-timeout] service={:?}", e.service);
            }
            EventKind::ShutdownRequested => {
                println!("[shutdown-requested]");
            }
            EventKind::LockDenied => {
                println!("[lock-denied] err={:?}", e.error);
            }
            EventKind::MuxFailed => {
                println!("[mux-failed] err={:?}", e.error);
            }
        }
    }
}
