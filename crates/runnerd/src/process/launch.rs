//! Supervises daemon launch sequencing and runtime orchestration.

use std::sync::Arc;

use tracing::info;

use runnerd_config::Config;

use crate::allow_list::{AllowListSource, FileAllowListSource};
use crate::bootstrap::{ConfigLoader, SystemConfigLoader};
use crate::handler::CommandConnectionHandler;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::permission::{CommandPolicy, PermissionRegistry};
use crate::telemetry;
use crate::transport::{ListenerHandle, SocketListener};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::signals::{ControlSignal, SignalSource, SystemSignals};

/// Collaborators required to launch the daemon runtime.
pub struct LaunchPlan<L, A, S> {
    /// Produces the daemon configuration.
    pub loader: L,
    /// Reads the allow-list at startup and on every reload.
    pub allow_list: A,
    /// Delivers reload and shutdown requests.
    pub signals: S,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn HealthReporter>,
}

/// Runs the daemon using the production collaborators.
///
/// Signal handlers are installed before anything else so a termination
/// request during startup is honoured as a graceful shutdown.
pub fn run_daemon() -> Result<(), LaunchError> {
    let signals = SystemSignals::install()?;
    run_daemon_with(LaunchPlan {
        loader: SystemConfigLoader,
        allow_list: FileAllowListSource,
        signals,
        reporter: Arc::new(StructuredHealthReporter::new()),
    })
}

/// Runs the daemon with injected collaborators.
///
/// Returns once a shutdown request has been handled and every in-flight
/// connection has finished.
pub fn run_daemon_with<L, A, S>(plan: LaunchPlan<L, A, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    A: AllowListSource,
    S: SignalSource,
{
    let LaunchPlan {
        loader,
        allow_list,
        mut signals,
        reporter,
    } = plan;

    let config = loader.load()?;
    telemetry::initialise(&config)?;
    reporter.bootstrap_starting();

    let (registry, listener) = match start_serving(&config, &allow_list, reporter.as_ref()) {
        Ok(started) => started,
        Err(error) => {
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };
    reporter.serving(&config);

    while let Some(ControlSignal::Reload) = signals.next_signal() {
        reload(&config, &allow_list, &registry, reporter.as_ref());
    }

    reporter.shutdown_started(listener.in_flight());
    listener.shutdown();
    listener.join()?;
    reporter.shutdown_completed();
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

fn start_serving<A>(
    config: &Config,
    allow_list: &A,
    reporter: &dyn HealthReporter,
) -> Result<(Arc<PermissionRegistry>, ListenerHandle), LaunchError>
where
    A: AllowListSource,
{
    let registry = Arc::new(PermissionRegistry::new());
    let payload = allow_list.read(config.allow_list())?;
    let commands = registry.reload(&payload);
    reporter.allow_list_reloaded(config.allow_list(), commands);

    config.endpoint().prepare_filesystem()?;
    let listener = SocketListener::bind(config.endpoint())?;
    let policy: Arc<dyn CommandPolicy> = Arc::<PermissionRegistry>::clone(&registry);
    let handler = Arc::new(CommandConnectionHandler::new(policy, config.timeout()));
    let handle = listener.start(handler)?;
    Ok((registry, handle))
}

fn reload<A>(
    config: &Config,
    allow_list: &A,
    registry: &PermissionRegistry,
    reporter: &dyn HealthReporter,
) where
    A: AllowListSource,
{
    match allow_list.read(config.allow_list()) {
        Ok(payload) => {
            let commands = registry.reload(&payload);
            reporter.allow_list_reloaded(config.allow_list(), commands);
        }
        Err(error) => reporter.reload_failed(&error),
    }
}
