//! Entry point for the `runnerd` daemon.

use std::io::{self, Write};
use std::process::ExitCode;

use runnerd::LaunchError;
use runnerd_config::ConfigError;

fn main() -> ExitCode {
    match runnerd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(LaunchError::Config {
            source: ConfigError::Cli(error),
        }) => error.exit(),
        Err(error) => {
            drop(writeln!(io::stderr(), "runnerd: {error}"));
            ExitCode::FAILURE
        }
    }
}
