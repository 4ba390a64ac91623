//! The daemon's two polling loops.
//!
//! Each loop runs in its own process (`bazaard settle-payments` and `bazaard finalize-auctions`), sharing
//! nothing but the database. A loop wakes on a fixed interval, runs one sweep, logs the outcome and goes
//! back to sleep. SIGTERM or ctrl-c stops it at the next wakeup, never mid-sweep.

mod finalization;
mod settlement;

pub use finalization::run_finalization_loop;
pub use settlement::run_settlement_loop;

use log::*;
use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::errors::DaemonError;

/// Waits for SIGINT or SIGTERM. A signal that arrives while the loop is mid-sweep is buffered and completes
/// the next call immediately.
pub(crate) struct Shutdown {
    sigint: Signal,
    sigterm: Signal,
}

impl Shutdown {
    pub fn listen() -> Result<Self, DaemonError> {
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| DaemonError::Startup(format!("could not install the SIGINT handler: {e}")))?;
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| DaemonError::Startup(format!("could not install the SIGTERM handler: {e}")))?;
        Ok(Self { sigint, sigterm })
    }

    pub async fn requested(&mut self) {
        tokio::select! {
            _ = self.sigint.recv() => info!("🛑️ Received SIGINT"),
            _ = self.sigterm.recv() => info!("🛑️ Received SIGTERM"),
        }
    }
}
