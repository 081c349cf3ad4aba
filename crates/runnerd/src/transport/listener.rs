//! Listener implementation for the daemon's request socket.

use std::fs;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6, TcpListener, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::socket::{self, Backlog, SockFlag, SockType, SockaddrIn6, UnixAddr, sockopt};
use tracing::{debug, info, warn};

use runnerd_config::{AddressFamily, SocketEndpoint, UnixMode};

use super::in_flight::InFlight;
use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Listener bound to a socket endpoint but not yet accepting.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    listener: ListenerKind,
}

#[derive(Debug)]
enum ListenerKind {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl SocketListener {
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        let listener = match endpoint {
            SocketEndpoint::Tcp { family, host, port } => {
                ListenerKind::Tcp(bind_tcp(*family, host, *port)?)
            }
            SocketEndpoint::Unix { path, mode } => {
                ListenerKind::Unix(bind_unix(path.as_std_path(), *mode)?)
            }
        };
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
        })
    }

    #[cfg(test)]
    pub(crate) fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match &self.listener {
            ListenerKind::Tcp(listener) => listener.local_addr().ok(),
            ListenerKind::Unix(_) => None,
        }
    }

    /// Starts the accept loop on a background thread.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        if let Err(source) = match &self.listener {
            ListenerKind::Tcp(listener) => listener.set_nonblocking(true),
            ListenerKind::Unix(listener) => listener.set_nonblocking(true),
        } {
            cleanup_unix_socket(&self.endpoint);
            return Err(ListenerError::NonBlocking { source });
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let in_flight = InFlight::default();
        let accept_loop = AcceptLoop {
            listener: self,
            shutdown: Arc::clone(&shutdown),
            in_flight: in_flight.clone(),
            handler,
        };
        let handle = thread::Builder::new()
            .name("runnerd-accept".to_owned())
            .spawn(move || accept_loop.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(ListenerHandle {
            shutdown,
            in_flight,
            handle: Some(handle),
        })
    }
}

/// Handle to a serving listener.
///
/// [`shutdown`](Self::shutdown) stops accepting new connections;
/// [`join`](Self::join) then waits for the accept thread and for every
/// handler that was already running.
#[derive(Debug)]
pub(crate) struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    in_flight: InFlight,
    handle: Option<thread::JoinHandle<()>>,
}

impl ListenerHandle {
    pub(crate) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Number of connection handlers currently running.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.count()
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        let accept_result = match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        };
        let pending = self.in_flight.count();
        if pending > 0 {
            info!(
                target: LISTENER_TARGET,
                pending,
                "waiting for in-flight connections"
            );
        }
        self.in_flight.wait_idle();
        accept_result
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

struct AcceptLoop {
    listener: SocketListener,
    shutdown: Arc<AtomicBool>,
    in_flight: InFlight,
    handler: Arc<dyn ConnectionHandler>,
}

impl AcceptLoop {
    fn run(self) {
        info!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.endpoint,
            "socket listener active"
        );
        let mut last_error = None::<io::ErrorKind>;
        while !self.shutdown.load(Ordering::SeqCst) {
            match accept_connection(&self.listener) {
                Ok(Some((stream, peer))) => {
                    last_error = None;
                    debug!(target: LISTENER_TARGET, peer = %peer, "accepted connection");
                    self.dispatch(stream);
                }
                Ok(None) => thread::sleep(ACCEPT_BACKOFF),
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(
                            target: LISTENER_TARGET,
                            error = %error,
                            "socket accept error"
                        );
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }

        info!(
            target: LISTENER_TARGET,
            endpoint = %self.listener.endpoint,
            "socket listener stopped accepting"
        );
        cleanup_unix_socket(&self.listener.endpoint);
    }

    fn dispatch(&self, stream: ConnectionStream) {
        let guard = self.in_flight.enter();
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name("runnerd-conn".to_owned())
            .spawn(move || {
                let _guard = guard;
                handler.handle(stream);
            });
        // On failure the closure is dropped, closing the stream and releasing
        // the guard.
        if let Err(error) = spawned {
            warn!(
                target: LISTENER_TARGET,
                error = %error,
                "failed to spawn connection handler"
            );
        }
    }
}

fn accept_connection(
    listener: &SocketListener,
) -> Result<Option<(ConnectionStream, String)>, io::Error> {
    match &listener.listener {
        ListenerKind::Tcp(tcp) => match tcp.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                Ok(Some((ConnectionStream::Tcp(stream), peer.to_string())))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
        ListenerKind::Unix(unix) => match unix.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false)?;
                Ok(Some((ConnectionStream::Unix(stream), format!("{peer:?}"))))
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        },
    }
}

fn bind_tcp(family: AddressFamily, host: &str, port: u16) -> Result<TcpListener, ListenerError> {
    if family == AddressFamily::Any && host == "::" {
        return bind_dual_stack(port);
    }
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs
        .find(|addr| match family {
            AddressFamily::Any => true,
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        })
        .ok_or_else(|| ListenerError::ResolveEmpty {
            host: host.to_owned(),
            port,
            family,
        })?;
    TcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

/// Binds the IPv6 wildcard so IPv4 peers arrive as mapped addresses. Hosts
/// without IPv6 get an IPv4 wildcard instead.
fn bind_dual_stack(port: u16) -> Result<TcpListener, ListenerError> {
    let addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    match bind_ipv6_wildcard(addr) {
        Ok(listener) => Ok(listener),
        Err(Errno::EAFNOSUPPORT | Errno::EADDRNOTAVAIL) => {
            debug!(
                target: LISTENER_TARGET,
                port,
                "IPv6 unavailable, listening on IPv4 only"
            );
            let fallback = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
            TcpListener::bind(fallback).map_err(|source| ListenerError::BindTcp {
                addr: fallback,
                source,
            })
        }
        Err(errno) => Err(ListenerError::BindTcp {
            addr: SocketAddr::V6(addr),
            source: io::Error::from(errno),
        }),
    }
}

fn bind_ipv6_wildcard(addr: SocketAddrV6) -> Result<TcpListener, Errno> {
    let fd = socket::socket(
        socket::AddressFamily::Inet6,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        None,
    )?;
    socket::setsockopt(&fd, sockopt::ReuseAddr, &true)?;
    socket::setsockopt(&fd, sockopt::Ipv6V6Only, &false)?;
    socket::bind(fd.as_raw_fd(), &SockaddrIn6::from(addr))?;
    socket::listen(&fd, Backlog::MAXCONN)?;
    Ok(TcpListener::from(fd))
}

fn bind_unix(path: &Path, mode: UnixMode) -> Result<UnixListener, ListenerError> {
    remove_stale_socket(path)?;
    match mode {
        UnixMode::Stream => UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
            path: path.display().to_string(),
            source,
        }),
        UnixMode::SeqPacket => {
            bind_seqpacket(path).map_err(|errno| ListenerError::SeqPacket {
                path: path.display().to_string(),
                source: io::Error::from(errno),
            })
        }
    }
}

/// Binds a `SOCK_SEQPACKET` socket and hands it to the standard library
/// listener, which accepts any connection-oriented Unix socket.
fn bind_seqpacket(path: &Path) -> Result<UnixListener, Errno> {
    let fd = socket::socket(
        socket::AddressFamily::Unix,
        SockType::SeqPacket,
        SockFlag::SOCK_CLOEXEC,
        None,
    )?;
    let address = UnixAddr::new(path)?;
    socket::bind(fd.as_raw_fd(), &address)?;
    socket::listen(&fd, Backlog::MAXCONN)?;
    Ok(UnixListener::from(fd))
}

fn remove_stale_socket(path: &Path) -> Result<(), ListenerError> {
    if !path.exists() {
        return Ok(());
    }
    let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
        path: path.display().to_string(),
        source,
    })?;
    if !metadata.file_type().is_socket() {
        return Err(ListenerError::UnixNotSocket {
            path: path.display().to_string(),
        });
    }
    match UnixStream::connect(path) {
        Ok(_stream) => Err(ListenerError::UnixInUse {
            path: path.display().to_string(),
        }),
        // A live seqpacket listener refuses stream connections with EPROTOTYPE.
        Err(error) if error.raw_os_error() == Some(Errno::EPROTOTYPE as i32) => {
            Err(ListenerError::UnixInUse {
                path: path.display().to_string(),
            })
        }
        Err(error)
            if error.kind() == io::ErrorKind::ConnectionRefused
                || error.kind() == io::ErrorKind::NotFound =>
        {
            fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                path: path.display().to_string(),
                source,
            })
        }
        Err(source) => Err(ListenerError::UnixConnect {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn cleanup_unix_socket(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}
