//! Connection handler that checks and runs one command per connection.
//!
//! The handler reads a single request line, consults the [`CommandPolicy`],
//! and either writes a denial or runs the command with its output streamed
//! back. The connection is closed when the handler returns, whatever the
//! outcome.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::launcher::{CommandLauncher, Completion, ExecutionError, ExecutionReport};
use crate::permission::CommandPolicy;
use crate::request::{Request, RequestError, read_request};
use crate::transport::{ConnectionHandler, ConnectionStream};

const HANDLER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::handler");

/// Errors that end a connection early.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request line could not be read.
    #[error(transparent)]
    Parse(#[from] RequestError),
    /// The permitted command could not be run.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// Writing the denial message failed.
    #[error("failed to write reply: {source}")]
    Reply {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Result of serving one connection.
#[derive(Debug)]
pub enum Outcome {
    /// The command was refused and the denial text was sent.
    Denied {
        /// The refused request.
        request: Request,
    },
    /// The command ran and its output was relayed.
    Executed {
        /// The executed request.
        request: Request,
        /// Output transfer and exit details.
        report: ExecutionReport,
    },
}

/// Serves command requests using a shared policy and a fixed timeout.
pub struct CommandConnectionHandler {
    policy: Arc<dyn CommandPolicy>,
    launcher: CommandLauncher,
    timeout: Duration,
}

impl CommandConnectionHandler {
    /// Creates a handler that runs permitted commands for at most `timeout`.
    #[must_use]
    pub fn new(policy: Arc<dyn CommandPolicy>, timeout: Duration) -> Self {
        Self {
            policy,
            launcher: CommandLauncher::new(),
            timeout,
        }
    }

    /// Reads one request from `stream` and answers it.
    ///
    /// A denial is a successful outcome. Nothing is executed when the request
    /// cannot be read.
    pub fn serve<S>(&self, stream: &mut S) -> Result<Outcome, HandlerError>
    where
        S: Read + Write + Send,
    {
        let request = read_request(stream)?;
        if !self.policy.is_allowed(request.tokens()) {
            write!(stream, "Command {request} is not allowed")
                .and_then(|()| stream.flush())
                .map_err(|source| HandlerError::Reply { source })?;
            return Ok(Outcome::Denied { request });
        }

        let running = self.launcher.spawn(&request, self.timeout)?;
        let report = running.relay(stream)?;
        Ok(Outcome::Executed { request, report })
    }
}

impl std::fmt::Debug for CommandConnectionHandler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("CommandConnectionHandler")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandler for CommandConnectionHandler {
    fn handle(&self, mut stream: ConnectionStream) {
        match self.serve(&mut stream) {
            Ok(outcome) => log_outcome(&outcome),
            Err(HandlerError::Parse(error)) => {
                debug!(
                    target: HANDLER_TARGET,
                    outcome = "parse_failure",
                    error = %error,
                    "discarded malformed request"
                );
            }
            Err(error) => {
                warn!(
                    target: HANDLER_TARGET,
                    outcome = "failed",
                    error = %error,
                    "connection failed"
                );
            }
        }
    }
}

fn log_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Denied { request } => {
            info!(
                target: HANDLER_TARGET,
                command = %request,
                outcome = "denied",
                "command not allowed"
            );
        }
        Outcome::Executed { request, report } => {
            let bytes = report.stdout.bytes + report.stderr.bytes;
            match report.completion {
                Completion::Exited(status) => info!(
                    target: HANDLER_TARGET,
                    command = %request,
                    outcome = "executed",
                    status = %status,
                    bytes,
                    "command finished"
                ),
                Completion::TimedOut => warn!(
                    target: HANDLER_TARGET,
                    command = %request,
                    outcome = "timed_out",
                    bytes,
                    "command killed at deadline"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{MockCommandPolicy, PermissionRegistry};
    use rstest::{fixture, rstest};
    use std::io::Cursor;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Instant;

    /// In-memory connection: reads from a fixed request, records the reply.
    struct Exchange {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Exchange {
        fn new(request: &[u8]) -> Self {
            Self {
                input: Cursor::new(request.to_vec()),
                output: Vec::new(),
            }
        }

        fn reply(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }
    }

    impl Read for Exchange {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Exchange {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[fixture]
    fn registry() -> Arc<PermissionRegistry> {
        let registry = PermissionRegistry::new();
        registry.reload(b"echo sleep");
        Arc::new(registry)
    }

    fn handler_with(policy: Arc<dyn CommandPolicy>, timeout: Duration) -> CommandConnectionHandler {
        CommandConnectionHandler::new(policy, timeout)
    }

    #[test]
    fn allowed_command_output_is_relayed() {
        let mut policy = MockCommandPolicy::new();
        policy
            .expect_is_allowed()
            .withf(|request| request == ["echo", "hello"])
            .times(1)
            .return_const(true);
        let handler = handler_with(Arc::new(policy), Duration::from_secs(5));
        let mut exchange = Exchange::new(b"echo hello\n");

        let outcome = handler.serve(&mut exchange).expect("serve request");

        assert!(matches!(
            outcome,
            Outcome::Executed { ref report, .. } if report.completion.success()
        ));
        assert_eq!(exchange.reply(), "hello\n");
    }

    #[test]
    fn denied_command_gets_denial_text() {
        let mut policy = MockCommandPolicy::new();
        policy.expect_is_allowed().times(1).return_const(false);
        let handler = handler_with(Arc::new(policy), Duration::from_secs(1));
        let mut exchange = Exchange::new(b"pang\n");

        let outcome = handler.serve(&mut exchange).expect("serve request");

        assert!(matches!(outcome, Outcome::Denied { .. }));
        assert_eq!(exchange.reply(), "Command pang is not allowed");
    }

    #[rstest]
    #[case(b"echo hi".as_slice())]
    #[case(b"".as_slice())]
    fn unterminated_request_runs_nothing(#[case] input: &[u8]) {
        let mut policy = MockCommandPolicy::new();
        policy.expect_is_allowed().never();
        let handler = handler_with(Arc::new(policy), Duration::from_secs(1));
        let mut exchange = Exchange::new(input);

        let error = handler.serve(&mut exchange).expect_err("request is incomplete");

        assert!(matches!(
            error,
            HandlerError::Parse(RequestError::Unterminated { .. })
        ));
        assert!(exchange.output.is_empty());
    }

    #[rstest]
    fn ampersand_request_is_denied_with_full_text(registry: Arc<PermissionRegistry>) {
        let handler = handler_with(registry, Duration::from_secs(1));
        let mut exchange = Exchange::new(b"echo & pang\n");

        let outcome = handler.serve(&mut exchange).expect("serve request");

        assert!(matches!(outcome, Outcome::Denied { .. }));
        assert_eq!(exchange.reply(), "Command echo & pang is not allowed");
    }

    #[rstest]
    fn slow_command_is_cut_off_at_timeout(registry: Arc<PermissionRegistry>) {
        let handler = handler_with(registry, Duration::from_millis(200));
        let mut exchange = Exchange::new(b"sleep 30\n");
        let started = Instant::now();

        let outcome = handler.serve(&mut exchange).expect("serve request");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            outcome,
            Outcome::Executed { ref report, .. } if report.completion == Completion::TimedOut
        ));
    }

    #[test]
    fn missing_program_is_an_execution_error() {
        let mut policy = MockCommandPolicy::new();
        policy.expect_is_allowed().return_const(true);
        let handler = handler_with(Arc::new(policy), Duration::from_secs(1));
        let mut exchange = Exchange::new(b"runnerd-no-such-program\n");

        let error = handler.serve(&mut exchange).expect_err("program is missing");

        assert!(matches!(
            error,
            HandlerError::Execution(ExecutionError::Spawn { .. })
        ));
    }

    #[rstest]
    fn handle_closes_tcp_connection_after_output(registry: Arc<PermissionRegistry>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        let addr = listener.local_addr().expect("listener address");
        let handler = handler_with(registry, Duration::from_secs(5));
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept connection");
            handler.handle(ConnectionStream::Tcp(stream));
        });

        let mut client = TcpStream::connect(addr).expect("connect client");
        client.write_all(b"echo over tcp\n").expect("write request");
        let mut response = String::new();
        client
            .read_to_string(&mut response)
            .expect("read until close");

        assert_eq!(response, "over tcp\n");
        server.join().expect("join server");
    }
}
