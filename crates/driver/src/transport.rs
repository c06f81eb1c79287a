//! Transport seam between the pool and the wire protocol.
//!
//! The pool tracks which servers a connection belongs to; it does not
//! care what flows over the socket. Wire encoding, handshakes, and
//! authentication live behind these traits, supplied by the operation
//! layer. A plain TCP implementation is provided as the default; the
//! [`mock`](crate::mock) module provides an in-memory one for tests.

use std::fmt;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use snafu::ResultExt;
use vellum_types::ServerRecord;

use crate::error::{ConnectSnafu, Result};

/// One established physical connection.
pub trait Transport: Send + fmt::Debug {
    /// Returns the address this transport was dialed against.
    fn peer_address(&self) -> &str;

    /// Shuts the connection down.
    ///
    /// Called when the connection is pruned or its owning handle is
    /// torn down. Errors are reported so callers can log them, but a
    /// failed close never escalates past that.
    fn close(&mut self) -> io::Result<()>;
}

/// Dials servers on behalf of the pool.
///
/// Implementations must be `Send + Sync`: a single connector instance
/// is shared by every client handle the pool creates.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Establishes a transport to the server described by `record`.
    fn connect(&self, record: &ServerRecord) -> Result<Box<dyn Transport>>;
}

/// Default connector: plain TCP with a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector that dials with the given timeout.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, record: &ServerRecord) -> Result<Box<dyn Transport>> {
        let address = record.address.as_str();
        let resolved = address
            .to_socket_addrs()
            .context(ConnectSnafu { address })?
            .next()
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
            })
            .context(ConnectSnafu { address })?;

        let stream = TcpStream::connect_timeout(&resolved, self.connect_timeout)
            .context(ConnectSnafu { address })?;

        Ok(Box::new(TcpTransport { peer: record.address.clone(), stream: Some(stream) }))
    }
}

/// Transport over a plain TCP stream.
#[derive(Debug)]
pub struct TcpTransport {
    peer: String,
    stream: Option<TcpStream>,
}

impl Transport for TcpTransport {
    fn peer_address(&self) -> &str {
        &self.peer
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.take() {
            Some(stream) => stream.shutdown(std::net::Shutdown::Both),
            None => Ok(()),
        }
    }
}
