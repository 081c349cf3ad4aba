//! Socket listener for the daemon's request endpoint.
//!
//! The transport module binds the configured endpoint, accepts connections on
//! a background thread, and runs each connection's handler on its own thread.
//! Shutdown stops the accept loop and then waits for every running handler.

mod errors;
mod handler;
mod in_flight;
mod listener;
#[cfg(test)]
mod test_utils;

pub(crate) use self::errors::ListenerError;
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream};
pub(crate) use self::listener::{ListenerHandle, SocketListener};
#[cfg(test)]
pub(crate) use self::test_utils::{BlockingHandler, CountingHandler};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
