//! Child process execution with a bounded run time.
//!
//! [`CommandLauncher::spawn`] starts the requested program in its own process
//! group with both output streams piped. [`RunningCommand::relay`] then copies
//! stdout to the destination while stderr is drained in parallel, writes the
//! captured stderr after stdout, and supervises the child against its
//! deadline. A child still running at the deadline has its whole process
//! group killed and is reaped before [`Completion::TimedOut`] is reported.

use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStderr, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, warn};

use crate::request::Request;

const LAUNCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launcher");
const POLL_INTERVAL: Duration = Duration::from_millis(25);
const COPY_BUFFER_BYTES: usize = 8 * 1024;
/// Longest deadline armed for a child; larger timeouts are capped here.
const MAX_DEADLINE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Errors raised while starting or supervising a child process.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The request carried no program name.
    #[error("request does not name a program")]
    EmptyCommand,
    /// The program could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program as requested.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// One of the child's output pipes was not available.
    #[error("failed to attach to {stream} of '{program}'")]
    StreamSetup {
        /// Program as requested.
        program: String,
        /// Stream that could not be captured.
        stream: &'static str,
    },
    /// A helper thread could not be started.
    #[error("failed to start output relay for '{program}': {source}")]
    Relay {
        /// Program as requested.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Waiting for the child failed.
    #[error("failed to wait for '{program}': {source}")]
    Wait {
        /// Program as requested.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Killing the child after its deadline failed.
    #[error("failed to kill '{program}': {source}")]
    Kill {
        /// Program as requested.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// How a child process finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The child exited on its own.
    Exited(ExitStatus),
    /// The child outlived its deadline and was killed.
    TimedOut,
}

impl Completion {
    /// Returns `true` for a zero exit status.
    #[must_use]
    pub fn success(&self) -> bool {
        matches!(self, Self::Exited(status) if status.success())
    }
}

/// Outcome of copying one output stream to the destination.
#[derive(Debug, Default)]
pub struct StreamTransfer {
    /// Bytes written to the destination.
    pub bytes: u64,
    /// Read or write failure that cut the transfer short.
    pub error: Option<io::Error>,
}

/// Summary of a finished command.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Transfer of the child's standard output.
    pub stdout: StreamTransfer,
    /// Transfer of the child's standard error.
    pub stderr: StreamTransfer,
    /// How the child finished.
    pub completion: Completion,
}

/// Starts child processes for permitted requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl CommandLauncher {
    /// Builds a launcher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Spawns the program named by `request` and arms a deadline of `timeout`.
    pub fn spawn(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<RunningCommand, ExecutionError> {
        let program = request.program().ok_or(ExecutionError::EmptyCommand)?;
        let deadline = deadline_after(timeout);
        let mut command = Command::new(program);
        command
            .args(request.arguments())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = command.spawn().map_err(|source| ExecutionError::Spawn {
            program: program.to_owned(),
            source,
        })?;
        debug!(
            target: LAUNCHER_TARGET,
            program,
            pid = child.id(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "spawned child process"
        );

        let Some(stdout) = child.stdout.take() else {
            discard(&mut child, program);
            return Err(ExecutionError::StreamSetup {
                program: program.to_owned(),
                stream: "stdout",
            });
        };
        let Some(stderr) = child.stderr.take() else {
            discard(&mut child, program);
            return Err(ExecutionError::StreamSetup {
                program: program.to_owned(),
                stream: "stderr",
            });
        };

        Ok(RunningCommand {
            program: program.to_owned(),
            child,
            deadline,
            stdout,
            stderr,
        })
    }
}

/// A spawned child whose output has not yet been relayed.
#[derive(Debug)]
pub struct RunningCommand {
    program: String,
    child: Child,
    deadline: Instant,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

impl RunningCommand {
    /// Copies stdout and then stderr to `sink` and waits for the child,
    /// killing it if the deadline passes first.
    ///
    /// Copy failures are reported in the [`ExecutionReport`]; they do not
    /// stop supervision of the child.
    pub fn relay<W>(self, sink: &mut W) -> Result<ExecutionReport, ExecutionError>
    where
        W: Write + Send,
    {
        let Self {
            program,
            mut child,
            deadline,
            stdout,
            stderr,
        } = self;

        thread::scope(|scope| {
            let (done_tx, done_rx) = mpsc::channel::<()>();
            let spawned = thread::Builder::new()
                .name(String::from("runnerd-relay"))
                .spawn_scoped(scope, move || relay_streams(stdout, stderr, sink, done_tx));
            let relay = match spawned {
                Ok(handle) => handle,
                Err(source) => {
                    discard(&mut child, &program);
                    return Err(ExecutionError::Relay { program, source });
                }
            };

            let completion = supervise(&mut child, &program, deadline, &done_rx)?;
            let (stdout_transfer, stderr_transfer) = relay.join().unwrap_or_else(|_| {
                let failed = || StreamTransfer {
                    bytes: 0,
                    error: Some(io::Error::other("output relay panicked")),
                };
                (failed(), failed())
            });
            log_transfer(&program, "stdout", &stdout_transfer);
            log_transfer(&program, "stderr", &stderr_transfer);
            Ok(ExecutionReport {
                stdout: stdout_transfer,
                stderr: stderr_transfer,
                completion,
            })
        })
    }
}

/// Copies both streams; dropping `_done` tells the supervisor the pipes are
/// exhausted.
fn relay_streams<W: Write + Send>(
    stdout: ChildStdout,
    stderr: ChildStderr,
    sink: &mut W,
    _done: Sender<()>,
) -> (StreamTransfer, StreamTransfer) {
    thread::scope(|scope| {
        let drained = thread::Builder::new()
            .name(String::from("runnerd-stderr"))
            .spawn_scoped(scope, move || capture(stderr));

        let stdout_transfer = transfer(stdout, sink);

        let (captured, read_error) = match drained {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|_| (Vec::new(), Some(io::Error::other("stderr reader panicked")))),
            Err(error) => (Vec::new(), Some(error)),
        };
        let mut stderr_transfer = StreamTransfer {
            bytes: 0,
            error: read_error,
        };
        if !captured.is_empty() {
            match sink.write_all(&captured) {
                Ok(()) => stderr_transfer.bytes = captured.len() as u64,
                Err(error) => stderr_transfer.error = Some(error),
            }
        }
        if let Err(error) = sink.flush()
            && stderr_transfer.error.is_none()
        {
            stderr_transfer.error = Some(error);
        }
        (stdout_transfer, stderr_transfer)
    })
}

fn transfer(mut source: impl Read, sink: &mut impl Write) -> StreamTransfer {
    let mut buffer = [0_u8; COPY_BUFFER_BYTES];
    let mut result = StreamTransfer::default();
    loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => return result,
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                result.error = Some(error);
                return result;
            }
        };
        let chunk = buffer.get(..read).unwrap_or_default();
        if let Err(error) = sink.write_all(chunk) {
            result.error = Some(error);
            return result;
        }
        result.bytes += read as u64;
    }
}

fn capture(mut source: impl Read) -> (Vec<u8>, Option<io::Error>) {
    let mut captured = Vec::new();
    match source.read_to_end(&mut captured) {
        Ok(_) => (captured, None),
        Err(error) => (captured, Some(error)),
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_DEADLINE))
        .or_else(|| now.checked_add(MAX_DEADLINE))
        .unwrap_or(now)
}

/// Waits for the relay to drain both pipes and for the child to exit, killing
/// the child once `deadline` passes.
fn supervise(
    child: &mut Child,
    program: &str,
    deadline: Instant,
    relay_done: &Receiver<()>,
) -> Result<Completion, ExecutionError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if let Err(RecvTimeoutError::Timeout) = relay_done.recv_timeout(remaining) {
        return terminate(child, program);
    }

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(
                    target: LAUNCHER_TARGET,
                    program,
                    ?status,
                    "child process exited"
                );
                return Ok(Completion::Exited(status));
            }
            Ok(None) => {
                let now = Instant::now();
                if now >= deadline {
                    return terminate(child, program);
                }
                thread::sleep(POLL_INTERVAL.min(deadline - now));
            }
            Err(source) => {
                discard(child, program);
                return Err(ExecutionError::Wait {
                    program: program.to_owned(),
                    source,
                });
            }
        }
    }
}

fn terminate(child: &mut Child, program: &str) -> Result<Completion, ExecutionError> {
    warn!(
        target: LAUNCHER_TARGET,
        program,
        pid = child.id(),
        "command timed out, killing process group"
    );
    kill_group(child, program);
    // Covers a child that moved itself out of the group.
    child.kill().map_err(|source| ExecutionError::Kill {
        program: program.to_owned(),
        source,
    })?;
    child.wait().map_err(|source| ExecutionError::Wait {
        program: program.to_owned(),
        source,
    })?;
    Ok(Completion::TimedOut)
}

/// Kills and reaps a child on an error path.
fn discard(child: &mut Child, program: &str) {
    kill_group(child, program);
    if let Err(error) = child.kill().and_then(|()| child.wait().map(drop)) {
        warn!(
            target: LAUNCHER_TARGET,
            program,
            error = %error,
            "failed to reap child process"
        );
    }
}

fn kill_group(child: &Child, program: &str) {
    let Ok(raw) = i32::try_from(child.id()) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(errno) => warn!(
            target: LAUNCHER_TARGET,
            program,
            error = %errno,
            "failed to signal process group"
        ),
    }
}

fn log_transfer(program: &str, stream: &'static str, transfer: &StreamTransfer) {
    match &transfer.error {
        None => debug!(
            target: LAUNCHER_TARGET,
            program,
            stream,
            bytes = transfer.bytes,
            "stream relayed"
        ),
        Some(error) => warn!(
            target: LAUNCHER_TARGET,
            program,
            stream,
            bytes = transfer.bytes,
            error = %error,
            "stream relay failed"
        ),
    }
}
