//! # Observer API: consuming runtime events.
//!
//! An [`Observer`] receives every [`Event`] published on the bus. The
//! built-in [`LogWriter`] renders them to stdout; embedders implement the
//! trait for metrics or custom sinks.

mod log;

pub use log::LogWriter;

use async_trait::async_trait;

use crate::events::Event;

/// # Consumer of runtime events.
///
/// Implementations must be cheap: events are delivered from a single
/// listener task and a slow observer delays the whole log stream (never the
/// supervision loop itself, which does not wait for observers).
#[async_trait]
pub trait Observer: Send + Sync {
    /// Handles one event.
    async fn on_event(&self, e: &Event);
}
