//! Control signals that drive allow-list reloads and shutdown.

use std::io;
use std::sync::mpsc::Receiver;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Control requests delivered to the running daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Re-read the allow-list.
    Reload,
    /// Stop accepting, drain in-flight work and exit.
    Shutdown,
}

/// Abstraction over the delivery of control signals.
pub trait SignalSource: Send {
    /// Blocks until the next control signal arrives.
    ///
    /// `None` means no further signals can arrive; the daemon treats that as
    /// a shutdown request.
    fn next_signal(&mut self) -> Option<ControlSignal>;
}

/// Errors reported while installing signal handlers.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Signal source backed by process signals.
///
/// `SIGHUP` requests a reload; `SIGINT`, `SIGTERM` and `SIGQUIT` request
/// shutdown. Handlers are installed on construction, so signals that arrive
/// during startup are queued rather than terminating the process.
pub struct SystemSignals {
    signals: Signals,
}

impl SystemSignals {
    /// Installs the handlers.
    pub fn install() -> Result<Self, SignalError> {
        let signals = Signals::new([SIGHUP, SIGINT, SIGTERM, SIGQUIT])
            .map_err(|source| SignalError::Install { source })?;
        Ok(Self { signals })
    }
}

impl std::fmt::Debug for SystemSignals {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("SystemSignals").finish_non_exhaustive()
    }
}

impl SignalSource for SystemSignals {
    fn next_signal(&mut self) -> Option<ControlSignal> {
        let signal = self.signals.forever().next()?;
        info!(target: PROCESS_TARGET, signal, "control signal received");
        Some(if signal == SIGHUP {
            ControlSignal::Reload
        } else {
            ControlSignal::Shutdown
        })
    }
}

/// Signal source fed from a channel; closing the sender ends the stream.
impl SignalSource for Receiver<ControlSignal> {
    fn next_signal(&mut self) -> Option<ControlSignal> {
        self.recv().ok()
    }
}
