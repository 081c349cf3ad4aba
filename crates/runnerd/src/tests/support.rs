//! Shared harness for tests that run the full daemon.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

use runnerd_config::{Config, SocketEndpoint};

use crate::allow_list::{AllowListError, FileAllowListSource};
use crate::bootstrap::StaticConfigLoader;
use crate::health::HealthReporter;
use crate::process::{ControlSignal, LaunchError, LaunchPlan, run_daemon_with};

const EVENT_WAIT: Duration = Duration::from_secs(5);

/// Lifecycle event captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Event {
    BootstrapStarting,
    BootstrapFailed,
    Serving,
    AllowListReloaded(usize),
    ReloadFailed,
    ShutdownStarted(usize),
    ShutdownCompleted,
}

/// Reporter that stores events so tests can wait for them.
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<Event>>,
    changed: Condvar,
}

impl RecordingReporter {
    fn record(&self, event: Event) {
        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push(event);
        self.changed.notify_all();
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until at least `occurrences` recorded events satisfy `matches`.
    pub(crate) fn wait_for(&self, occurrences: usize, matches: impl Fn(&Event) -> bool) -> bool {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let (events, _) = self
            .changed
            .wait_timeout_while(events, EVENT_WAIT, |events| {
                events.iter().filter(|&event| matches(event)).count() < occurrences
            })
            .unwrap_or_else(PoisonError::into_inner);
        events.iter().filter(|&event| matches(event)).count() >= occurrences
    }
}

impl HealthReporter for RecordingReporter {
    fn bootstrap_starting(&self) {
        self.record(Event::BootstrapStarting);
    }

    fn bootstrap_failed(&self, _error: &LaunchError) {
        self.record(Event::BootstrapFailed);
    }

    fn serving(&self, _config: &Config) {
        self.record(Event::Serving);
    }

    fn allow_list_reloaded(&self, _path: &Utf8Path, commands: usize) {
        self.record(Event::AllowListReloaded(commands));
    }

    fn reload_failed(&self, _error: &AllowListError) {
        self.record(Event::ReloadFailed);
    }

    fn shutdown_started(&self, in_flight: usize) {
        self.record(Event::ShutdownStarted(in_flight));
    }

    fn shutdown_completed(&self) {
        self.record(Event::ShutdownCompleted);
    }
}

fn is_reload_result(event: &Event) -> bool {
    matches!(event, Event::AllowListReloaded(_) | Event::ReloadFailed)
}

/// A daemon running on a Unix socket inside a temporary directory.
pub(crate) struct DaemonHarness {
    dir: TempDir,
    socket: PathBuf,
    allow_list: Utf8PathBuf,
    reporter: Arc<RecordingReporter>,
    control: Option<Sender<ControlSignal>>,
    daemon: Option<JoinHandle<Result<(), LaunchError>>>,
}

impl DaemonHarness {
    /// Writes `commands` to a fresh allow-list and starts serving.
    pub(crate) fn start(commands: &str, timeout: Duration) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("runnerd.sock");
        let allow_list =
            Utf8PathBuf::from_path_buf(dir.path().join("allowed.conf")).expect("utf8 path");
        fs::write(&allow_list, commands).expect("write allow-list");
        let config = Config::default()
            .with_endpoint(SocketEndpoint::unix(
                socket.to_str().expect("utf8 socket path"),
            ))
            .with_timeout(timeout)
            .with_allow_list(allow_list.clone());

        let reporter = Arc::new(RecordingReporter::default());
        let (control, signals) = mpsc::channel();
        let plan = LaunchPlan {
            loader: StaticConfigLoader::new(config),
            allow_list: FileAllowListSource,
            signals,
            reporter: Arc::clone(&reporter) as Arc<dyn HealthReporter>,
        };
        let daemon = thread::spawn(move || run_daemon_with(plan));
        assert!(
            reporter.wait_for(1, |event| *event == Event::Serving),
            "daemon did not start: {:?}",
            reporter.events()
        );

        Self {
            dir,
            socket,
            allow_list,
            reporter,
            control: Some(control),
            daemon: Some(daemon),
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn reporter(&self) -> &RecordingReporter {
        &self.reporter
    }

    pub(crate) fn connect(&self) -> UnixStream {
        UnixStream::connect(&self.socket).expect("connect to daemon")
    }

    /// Sends `line` verbatim and returns everything received until close.
    pub(crate) fn exchange(&self, line: &[u8]) -> String {
        let mut stream = self.connect();
        stream.write_all(line).expect("write request");
        read_reply(&mut stream)
    }

    pub(crate) fn write_allow_list(&self, commands: &str) {
        fs::write(&self.allow_list, commands).expect("rewrite allow-list");
    }

    pub(crate) fn remove_allow_list(&self) {
        fs::remove_file(&self.allow_list).expect("remove allow-list");
    }

    /// Requests a reload and waits until its result has been reported.
    pub(crate) fn reload(&self) {
        let before = self
            .reporter
            .events()
            .iter()
            .filter(|&event| is_reload_result(event))
            .count();
        self.send(ControlSignal::Reload);
        assert!(
            self.reporter.wait_for(before + 1, is_reload_result),
            "reload was not reported"
        );
    }

    /// Requests shutdown and waits for the daemon to return.
    pub(crate) fn stop(&mut self) -> Result<(), LaunchError> {
        if let Some(control) = self.control.take() {
            let _ = control.send(ControlSignal::Shutdown);
        }
        match self.daemon.take() {
            Some(daemon) => daemon.join().expect("daemon thread panicked"),
            None => Ok(()),
        }
    }

    fn send(&self, signal: ControlSignal) {
        self.control
            .as_ref()
            .expect("daemon is running")
            .send(signal)
            .expect("daemon control channel");
    }
}

impl Drop for DaemonHarness {
    fn drop(&mut self) {
        drop(self.control.take());
        if let Some(daemon) = self.daemon.take() {
            let _ = daemon.join();
        }
    }
}

pub(crate) fn read_reply(stream: &mut impl Read) -> String {
    let mut reply = String::new();
    stream.read_to_string(&mut reply).expect("read reply");
    reply
}
