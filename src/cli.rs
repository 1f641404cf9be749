//! Command-line front end for the scanner binary.

use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::EXIT_MUX;
use crate::events::Bus;
use crate::mux::{SignalEvent, WaitMux};
use crate::observers::{LogWriter, Observer};
use crate::proc::TokioLauncher;
use crate::scan::SvScan;
use crate::signal;

#[derive(Debug, Parser)]
#[command(name = "servitor", version, about = "directory-driven service supervisor")]
pub struct Args {
    /// Directory to scan for service definitions
    #[arg(default_value = ".")]
    pub scan_dir: PathBuf,

    /// Periodic rescan interval in milliseconds (0 disables)
    #[arg(long = "rescan", value_name = "MS", default_value_t = 0)]
    pub rescan: u64,

    /// Divert the close event into an orderly exit instead of a hard stop
    #[arg(long = "signals")]
    pub signals: bool,
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            scan_dir: self.scan_dir,
            rescan: Duration::from_millis(self.rescan),
            signals_diverted: self.signals,
            ..Config::default()
        }
    }
}

/// Parses the command line and runs the scanner to completion.
pub fn run() -> ExitCode {
    let cfg = Args::parse().into_config();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("servitor: failed to build runtime: {e}");
            return ExitCode::from(EXIT_MUX as u8);
        }
    };
    let code = runtime.block_on(run_scanner(cfg));
    ExitCode::from(code.clamp(0, 255) as u8)
}

async fn run_scanner(cfg: Config) -> i32 {
    let bus = Bus::new(cfg.bus_capacity);
    let token = CancellationToken::new();
    spawn_observer(&bus, &token);

    let close_event = SignalEvent::new();
    signal::forward_shutdown_signals(close_event.clone());

    let mut mux = WaitMux::new(bus.clone());
    let scanner = SvScan::new(cfg, Rc::new(TokioLauncher), bus, close_event);
    scanner.register(&mut mux);

    let code = mux.run().await;
    token.cancel();
    // One tick so the observer can flush what the stop pass published.
    tokio::task::yield_now().await;
    code
}

fn spawn_observer(bus: &Bus, token: &CancellationToken) {
    let mut rx = bus.subscribe();
    let token = token.clone();
    let obs: Arc<dyn Observer> = Arc::new(LogWriter);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                ev = rx.recv() => match ev {
                    Ok(ev) => obs.on_event(&ev).await,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(_)) => continue,
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_scan_the_current_directory() {
        let cfg = Args::parse_from(["servitor"]).into_config();
        assert_eq!(cfg.scan_dir, PathBuf::from("."));
        assert_eq!(cfg.rescan, Duration::ZERO);
        assert!(!cfg.signals_diverted);
    }

    #[test]
    fn flags_map_onto_the_config() {
        let cfg = Args::parse_from(["servitor", "/srv/services", "--rescan", "5000", "--signals"])
            .into_config();
        assert_eq!(cfg.scan_dir, PathBuf::from("/srv/services"));
        assert_eq!(cfg.rescan, Duration::from_secs(5));
        assert!(cfg.signals_diverted);
    }
}
