//! Log output formats.

use strum::{Display, EnumString};

/// Output formats understood by the daemon's tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One flattened JSON object per event.
    #[default]
    Json,
    /// Single-line human-readable output.
    Compact,
}
