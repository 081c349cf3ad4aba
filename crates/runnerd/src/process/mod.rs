//! Daemon launch sequencing and runtime control.

mod errors;
pub(crate) mod launch;
pub(crate) mod signals;

pub use errors::LaunchError;
pub use launch::{LaunchPlan, run_daemon, run_daemon_with};
pub use signals::{ControlSignal, SignalError, SignalSource, SystemSignals};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
