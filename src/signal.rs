//! OS signal wiring for the close event.
//!
//! The scanner's close event is a [`SignalEvent`]; the terminal and admin
//! tooling reach it through process signals. [`forward_shutdown_signals`]
//! spawns the task that turns the first termination signal into a signaled
//! close event, which the wait loop then dispatches like any other handle.

use crate::mux::SignalEvent;

/// Spawns a task that sets `close_event` on the first termination signal.
///
/// On Unix this listens for SIGINT, SIGTERM, and SIGQUIT; elsewhere only
/// Ctrl-C is available. If listener registration fails the event is left
/// untouched, and an embedder can still set it programmatically.
pub fn forward_shutdown_signals(close_event: SignalEvent) {
    tokio::spawn(async move {
        if shutdown_signal_received().await {
            close_event.set();
        }
    });
}

/// Resolves `true` once any termination signal arrives.
#[cfg(unix)]
async fn shutdown_signal_received() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    let kinds = [
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::quit(),
    ];
    let mut streams = Vec::with_capacity(kinds.len());
    for kind in kinds {
        match signal(kind) {
            Ok(stream) => streams.push(stream),
            Err(_) => return false,
        }
    }

    // First arrival wins, whichever signal it was.
    let arrivals: Vec<_> = streams
        .iter_mut()
        .map(|stream| Box::pin(stream.recv()))
        .collect();
    futures::future::select_all(arrivals).await;
    true
}

/// Resolves `true` once any termination signal arrives.
#[cfg(not(unix))]
async fn shutdown_signal_received() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
