//! Configuration for the `runnerd` remote command runner.
//!
//! The daemon is configured entirely from command-line flags (with a few
//! environment fallbacks). [`Config::load`] parses the process arguments,
//! resolves the network kind and address into a [`SocketEndpoint`], and clamps
//! the command timeout. The resulting value is immutable for the lifetime of
//! the daemon.

mod cli;
mod defaults;
mod logging;
mod socket;

use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;

use crate::cli::Cli;

pub use defaults::{
    DEFAULT_ADDRESS, DEFAULT_ALLOW_LIST_PATH, DEFAULT_LOG_FILTER, DEFAULT_NETWORK,
    MIN_TIMEOUT_SECS, clamp_timeout, default_allow_list_path, default_log_format,
};
pub use logging::LogFormat;
pub use socket::{
    AddressFamily, NetworkKind, SocketEndpoint, SocketParseError,
    SocketPreparationError, UnixMode,
};

/// Errors raised while building a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Flag parsing failed, or `--help`/`--version` was requested.
    #[error(transparent)]
    Cli(#[from] clap::Error),
    /// The address does not fit the requested network kind.
    #[error("invalid address '{address}' for network {network}: {source}")]
    Address {
        /// Requested network kind.
        network: NetworkKind,
        /// Address as supplied.
        address: String,
        /// Underlying parse error.
        #[source]
        source: SocketParseError,
    },
}

/// Immutable daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    endpoint: SocketEndpoint,
    timeout: Duration,
    allow_list: Utf8PathBuf,
    log_filter: String,
    log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: SocketEndpoint::tcp("::", 8081),
            timeout: Duration::from_secs(MIN_TIMEOUT_SECS),
            allow_list: default_allow_list_path(),
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Loads configuration from the process arguments.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Loads configuration from an explicit argument list. The first item is
    /// the program name.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli = Cli::try_parse_from(args)?;
        Self::from_cli(cli)
    }

    fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let endpoint = SocketEndpoint::parse(cli.network, &cli.address).map_err(|source| {
            ConfigError::Address {
                network: cli.network,
                address: cli.address.clone(),
                source,
            }
        })?;
        Ok(Self {
            endpoint,
            timeout: clamp_timeout(cli.timeout),
            allow_list: cli.allow_list,
            log_filter: cli.log_filter,
            log_format: cli.log_format,
        })
    }

    /// Replaces the listen endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: SocketEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Replaces the command timeout, enforcing the one second floor.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_secs(MIN_TIMEOUT_SECS));
        self
    }

    /// Replaces the allow-list path.
    #[must_use]
    pub fn with_allow_list(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.allow_list = path.into();
        self
    }

    /// Endpoint the daemon listens on.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Upper bound on each command's run time.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Path to the allow-list file.
    #[must_use]
    pub fn allow_list(&self) -> &Utf8Path {
        self.allow_list.as_path()
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
