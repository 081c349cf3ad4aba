//! Remote command runner daemon.
//!
//! The daemon listens on a configured socket, reads a single newline
//! terminated request per connection, and runs the named program when it
//! appears on the allow-list. The child's standard output and then its
//! standard error are streamed back before the connection is closed. A child
//! that outlives the configured timeout is killed together with its process
//! group.
//!
//! The allow-list is read at startup and re-read on `SIGHUP`; a failed
//! re-read keeps the previous list. `SIGINT`, `SIGTERM` and `SIGQUIT` stop
//! the listener and wait for every in-flight connection before
//! [`run_daemon`] returns.
//!
//! Configuration is parsed by [`runnerd_config`]. Lifecycle events are
//! reported through a [`HealthReporter`], and every layer logs structured
//! events via `tracing`.

mod allow_list;
mod bootstrap;
mod handler;
mod health;
mod launcher;
mod permission;
mod process;
mod request;
mod telemetry;
mod transport;

pub use allow_list::{AllowListError, AllowListSource, FileAllowListSource};
pub use bootstrap::{ConfigLoader, StaticConfigLoader, SystemConfigLoader};
pub use handler::{CommandConnectionHandler, HandlerError, Outcome};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use launcher::{
    CommandLauncher, Completion, ExecutionError, ExecutionReport, RunningCommand, StreamTransfer,
};
pub use permission::{AllowList, CommandPolicy, PermissionRegistry};
pub use process::{
    ControlSignal, LaunchError, LaunchPlan, SignalError, SignalSource, SystemSignals, run_daemon,
    run_daemon_with,
};
pub use request::{Request, RequestError, read_request};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
