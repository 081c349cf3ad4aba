//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use camino::Utf8Path;

use runnerd_config::Config;

use crate::allow_list::AllowListError;
use crate::process::LaunchError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked once telemetry is available, before anything is bound.
    fn bootstrap_starting(&self);

    /// Invoked when startup fails before the listener is serving.
    fn bootstrap_failed(&self, error: &LaunchError);

    /// Invoked once the listener accepts connections.
    fn serving(&self, config: &Config);

    /// Invoked after the allow-list has been replaced.
    fn allow_list_reloaded(&self, path: &Utf8Path, commands: usize);

    /// Invoked when a reload could not read the allow-list.
    fn reload_failed(&self, error: &AllowListError);

    /// Invoked when shutdown begins.
    fn shutdown_started(&self, in_flight: usize);

    /// Invoked after every in-flight connection has finished.
    fn shutdown_completed(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_failed(&self, error: &LaunchError) {
        (**self).bootstrap_failed(error);
    }

    fn serving(&self, config: &Config) {
        (**self).serving(config);
    }

    fn allow_list_reloaded(&self, path: &Utf8Path, commands: usize) {
        (**self).allow_list_reloaded(path, commands);
    }

    fn reload_failed(&self, error: &AllowListError) {
        (**self).reload_failed(error);
    }

    fn shutdown_started(&self, in_flight: usize) {
        (**self).shutdown_started(in_flight);
    }

    fn shutdown_completed(&self) {
        (**self).shutdown_completed();
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_failed(&self, error: &LaunchError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn serving(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "serving",
            endpoint = %config.endpoint(),
            timeout_secs = config.timeout().as_secs(),
            allow_list = %config.allow_list(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "daemon serving"
        );
    }

    fn allow_list_reloaded(&self, path: &Utf8Path, commands: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "allow_list_reloaded",
            path = %path,
            commands,
            "allow-list loaded"
        );
    }

    fn reload_failed(&self, error: &AllowListError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "reload_failed",
            error = %error,
            "allow-list reload failed; keeping previous list"
        );
    }

    fn shutdown_started(&self, in_flight: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_started",
            in_flight,
            "shutting down"
        );
    }

    fn shutdown_completed(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_completed",
            "shutdown completed"
        );
    }
}
