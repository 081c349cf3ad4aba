//! Command-line flag definitions for the daemon.

use camino::Utf8PathBuf;
use clap::Parser;

use crate::defaults::{DEFAULT_ADDRESS, DEFAULT_ALLOW_LIST_PATH, DEFAULT_LOG_FILTER, DEFAULT_NETWORK};
use crate::logging::LogFormat;
use crate::socket::NetworkKind;

/// Remote command runner daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "runnerd", version, about)]
pub(crate) struct Cli {
    /// Network to listen on: tcp, tcp4, tcp6, unix or unixpacket.
    #[arg(short = 'p', long, value_name = "KIND", default_value_t = DEFAULT_NETWORK)]
    pub(crate) network: NetworkKind,
    /// Address to listen on (`host:port` for TCP, a path for Unix sockets).
    #[arg(short = 'a', long, value_name = "ADDR", default_value = DEFAULT_ADDRESS)]
    pub(crate) address: String,
    /// Command execution timeout in seconds; values below 1 are raised to 1.
    #[arg(
        short = 't',
        long,
        value_name = "SECS",
        default_value_t = 1,
        allow_negative_numbers = true
    )]
    pub(crate) timeout: i64,
    /// File listing the permitted command names.
    #[arg(
        short = 'c',
        long,
        value_name = "PATH",
        env = "RUNNERD_ALLOW_LIST",
        default_value = DEFAULT_ALLOW_LIST_PATH
    )]
    pub(crate) allow_list: Utf8PathBuf,
    /// Tracing filter expression, for example `info` or `runnerd=debug`.
    #[arg(
        long,
        value_name = "FILTER",
        env = "RUNNERD_LOG_FILTER",
        default_value = DEFAULT_LOG_FILTER
    )]
    pub(crate) log_filter: String,
    /// Log output format: json or compact.
    #[arg(
        long,
        value_name = "FORMAT",
        env = "RUNNERD_LOG_FORMAT",
        default_value = "json"
    )]
    pub(crate) log_format: LogFormat,
}
