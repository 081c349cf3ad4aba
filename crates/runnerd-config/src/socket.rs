//! Network kinds and the socket endpoints they resolve to.

use std::fmt;
use std::fs::DirBuilder;

use camino::{Utf8Path, Utf8PathBuf};
use strum::{Display, EnumString};
use thiserror::Error;

/// Network kinds accepted by `--network`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NetworkKind {
    /// TCP over whichever address family the host resolves to.
    #[default]
    Tcp,
    /// TCP restricted to IPv4 addresses.
    Tcp4,
    /// TCP restricted to IPv6 addresses.
    Tcp6,
    /// Unix domain stream socket.
    Unix,
    /// Unix domain sequenced-packet socket.
    UnixPacket,
}

/// Address family filter applied to resolved TCP addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    /// Accept the first IPv4 or IPv6 address.
    Any,
    /// Accept IPv4 addresses only.
    V4,
    /// Accept IPv6 addresses only.
    V6,
}

impl AddressFamily {
    const fn unspecified_host(self) -> &'static str {
        match self {
            Self::V4 => "0.0.0.0",
            Self::Any | Self::V6 => "::",
        }
    }
}

/// Socket type used for Unix domain endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnixMode {
    /// `SOCK_STREAM`.
    Stream,
    /// `SOCK_SEQPACKET`.
    SeqPacket,
}

/// Bindable daemon endpoint derived from a network kind and an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEndpoint {
    /// TCP endpoint.
    Tcp {
        /// Address family filter applied during resolution.
        family: AddressFamily,
        /// Host name or literal address.
        host: String,
        /// TCP port; zero asks the OS for an ephemeral port.
        port: u16,
    },
    /// Unix domain socket endpoint.
    Unix {
        /// Filesystem path of the socket.
        path: Utf8PathBuf,
        /// Socket type.
        mode: UnixMode,
    },
}

impl SocketEndpoint {
    /// Builds a TCP endpoint accepting either address family.
    #[must_use]
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            family: AddressFamily::Any,
            host: host.into(),
            port,
        }
    }

    /// Builds a Unix domain stream socket endpoint.
    #[must_use]
    pub fn unix(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix {
            path: path.into(),
            mode: UnixMode::Stream,
        }
    }

    /// Builds a Unix domain sequenced-packet socket endpoint.
    #[must_use]
    pub fn unix_packet(path: impl Into<Utf8PathBuf>) -> Self {
        Self::Unix {
            path: path.into(),
            mode: UnixMode::SeqPacket,
        }
    }

    /// Resolves `address` according to `kind`.
    ///
    /// TCP addresses take the form `host:port`; the host may be empty (all
    /// interfaces) or a bracketed IPv6 literal. An empty host is `::` for
    /// `tcp` and `tcp6` and `0.0.0.0` for `tcp4`. Unix addresses are paths.
    pub fn parse(kind: NetworkKind, address: &str) -> Result<Self, SocketParseError> {
        match kind {
            NetworkKind::Tcp => parse_tcp(AddressFamily::Any, address),
            NetworkKind::Tcp4 => parse_tcp(AddressFamily::V4, address),
            NetworkKind::Tcp6 => parse_tcp(AddressFamily::V6, address),
            NetworkKind::Unix => parse_unix(UnixMode::Stream, address),
            NetworkKind::UnixPacket => parse_unix(UnixMode::SeqPacket, address),
        }
    }

    /// Network kind this endpoint was built for.
    #[must_use]
    pub const fn kind(&self) -> NetworkKind {
        match self {
            Self::Tcp {
                family: AddressFamily::Any,
                ..
            } => NetworkKind::Tcp,
            Self::Tcp {
                family: AddressFamily::V4,
                ..
            } => NetworkKind::Tcp4,
            Self::Tcp {
                family: AddressFamily::V6,
                ..
            } => NetworkKind::Tcp6,
            Self::Unix {
                mode: UnixMode::Stream,
                ..
            } => NetworkKind::Unix,
            Self::Unix {
                mode: UnixMode::SeqPacket,
                ..
            } => NetworkKind::UnixPacket,
        }
    }

    /// Returns the Unix socket path when the endpoint uses a Unix transport.
    #[must_use]
    pub fn unix_path(&self) -> Option<&Utf8Path> {
        match self {
            Self::Unix { path, .. } => Some(path.as_ref()),
            Self::Tcp { .. } => None,
        }
    }

    /// Ensures the socket's parent directory exists with restrictive permissions.
    pub fn prepare_filesystem(&self) -> Result<(), SocketPreparationError> {
        let Some(path) = self.unix_path() else {
            return Ok(());
        };
        let Some(parent) = path.parent() else {
            return Err(SocketPreparationError::MissingParent {
                path: path.to_path_buf(),
            });
        };
        if parent.as_str().is_empty() {
            return Ok(());
        }

        let mut builder = DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        if let Err(source) = builder.create(parent.as_std_path())
            && source.kind() != std::io::ErrorKind::AlreadyExists
        {
            return Err(SocketPreparationError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            });
        }

        Ok(())
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port, .. } if host.contains(':') => {
                write!(formatter, "{}://[{host}]:{port}", self.kind())
            }
            Self::Tcp { host, port, .. } => write!(formatter, "{}://{host}:{port}", self.kind()),
            Self::Unix { path, .. } => write!(formatter, "{}://{path}", self.kind()),
        }
    }
}

fn parse_tcp(family: AddressFamily, address: &str) -> Result<SocketEndpoint, SocketParseError> {
    let Some((raw_host, raw_port)) = address.rsplit_once(':') else {
        return Err(SocketParseError::MissingPort(address.to_owned()));
    };
    if raw_port.is_empty() {
        return Err(SocketParseError::MissingPort(address.to_owned()));
    }
    let port = raw_port
        .parse::<u16>()
        .map_err(|_| SocketParseError::InvalidPort {
            address: address.to_owned(),
            port: raw_port.to_owned(),
        })?;
    let bare_host = raw_host
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(raw_host);
    let host = if bare_host.is_empty() {
        family.unspecified_host()
    } else {
        bare_host
    };
    Ok(SocketEndpoint::Tcp {
        family,
        host: host.to_owned(),
        port,
    })
}

fn parse_unix(mode: UnixMode, address: &str) -> Result<SocketEndpoint, SocketParseError> {
    if address.is_empty() {
        return Err(SocketParseError::MissingUnixPath);
    }
    Ok(SocketEndpoint::Unix {
        path: Utf8PathBuf::from(address),
        mode,
    })
}

/// Errors encountered while deriving a [`SocketEndpoint`] from an address.
#[derive(Debug, Error)]
pub enum SocketParseError {
    /// TCP port separator or value was missing.
    #[error("missing TCP port in '{0}'")]
    MissingPort(String),
    /// TCP port was not a number in range.
    #[error("invalid TCP port '{port}' in '{address}'")]
    InvalidPort {
        /// Address as supplied.
        address: String,
        /// Offending port text.
        port: String,
    },
    /// Unix socket path was absent.
    #[error("missing Unix socket path")]
    MissingUnixPath,
}

/// Errors raised when preparing socket directories.
#[derive(Debug, Error)]
pub enum SocketPreparationError {
    /// Parent directory is missing when creating a Unix socket path.
    #[error("socket path '{path}' has no parent directory")]
    MissingParent {
        /// Configured socket path.
        path: Utf8PathBuf,
    },
    /// Failed to create or adjust socket directories.
    #[error("failed to create socket directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(NetworkKind::Tcp, ":8081", "tcp://[::]:8081")]
    #[case(NetworkKind::Tcp4, ":8081", "tcp4://0.0.0.0:8081")]
    #[case(NetworkKind::Tcp4, "127.0.0.1:9000", "tcp4://127.0.0.1:9000")]
    #[case(NetworkKind::Tcp6, ":8081", "tcp6://[::]:8081")]
    #[case(NetworkKind::Tcp6, "[::1]:7000", "tcp6://[::1]:7000")]
    #[case(NetworkKind::Unix, "/tmp/runnerd.sock", "unix:///tmp/runnerd.sock")]
    #[case(
        NetworkKind::UnixPacket,
        "/tmp/runnerd.sock",
        "unixpacket:///tmp/runnerd.sock"
    )]
    fn parses_addresses_for_each_kind(
        #[case] kind: NetworkKind,
        #[case] address: &str,
        #[case] expected: &str,
    ) {
        let endpoint = SocketEndpoint::parse(kind, address).expect("address should parse");
        assert_eq!(endpoint.to_string(), expected);
        assert_eq!(endpoint.kind(), kind);
    }

    #[rstest]
    #[case("localhost")]
    #[case("localhost:")]
    fn rejects_tcp_address_without_port(#[case] address: &str) {
        let error = SocketEndpoint::parse(NetworkKind::Tcp, address).expect_err("missing port");
        assert!(matches!(error, SocketParseError::MissingPort(_)));
    }

    #[test]
    fn rejects_out_of_range_port() {
        let error =
            SocketEndpoint::parse(NetworkKind::Tcp, "localhost:70000").expect_err("bad port");
        assert!(matches!(error, SocketParseError::InvalidPort { .. }));
    }

    #[test]
    fn rejects_empty_unix_path() {
        let error = SocketEndpoint::parse(NetworkKind::Unix, "").expect_err("empty path");
        assert!(matches!(error, SocketParseError::MissingUnixPath));
    }

    #[rstest]
    #[case("tcp", NetworkKind::Tcp)]
    #[case("TCP6", NetworkKind::Tcp6)]
    #[case("unixpacket", NetworkKind::UnixPacket)]
    fn network_kind_parses_case_insensitively(#[case] raw: &str, #[case] expected: NetworkKind) {
        assert_eq!(raw.parse::<NetworkKind>().expect("kind parses"), expected);
    }

    #[test]
    fn prepare_filesystem_creates_socket_parent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket = dir.path().join("nested").join("runnerd.sock");
        let endpoint = SocketEndpoint::unix(socket.to_str().expect("utf8 path"));
        endpoint.prepare_filesystem().expect("prepare socket dir");
        assert!(dir.path().join("nested").is_dir());
    }
}
