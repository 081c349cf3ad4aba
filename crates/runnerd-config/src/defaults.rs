//! Default values for daemon settings.

use std::time::Duration;

use camino::Utf8PathBuf;

use crate::socket::NetworkKind;

/// Network kind used when `--network` is omitted.
pub const DEFAULT_NETWORK: NetworkKind = NetworkKind::Tcp;

/// Listen address used when `--address` is omitted.
pub const DEFAULT_ADDRESS: &str = ":8081";

/// Allow-list file read at startup and on every reload.
pub const DEFAULT_ALLOW_LIST_PATH: &str = "/etc/remote-runnerd.conf";

/// Default and minimum command timeout, in whole seconds.
pub const MIN_TIMEOUT_SECS: u64 = 1;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default allow-list path as an owned value.
#[must_use]
pub fn default_allow_list_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_ALLOW_LIST_PATH)
}

/// Default logging format for the daemon.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Converts a requested timeout into a [`Duration`], clamping values below
/// [`MIN_TIMEOUT_SECS`] up to the minimum.
#[must_use]
pub fn clamp_timeout(secs: i64) -> Duration {
    let clamped = u64::try_from(secs).map_or(MIN_TIMEOUT_SECS, |value| value.max(MIN_TIMEOUT_SECS));
    Duration::from_secs(clamped)
}
