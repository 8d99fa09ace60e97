//! Transport contract and the TCP implementation
//!
//! A transport delivers one encoded batch per `send` and waits for the
//! single-byte reply. The pool and the network store only see the
//! [`Transport`] and [`Connector`] traits, so tests swap in mocks.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use rand::seq::SliceRandom;
use sluice_protocol::{MessageBatch, ProtocolError, ResultCode, wire};
use socket2::{SockRef, TcpKeepalive};

/// Keep-alive interval on pooled sockets
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Errors from a transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Nothing to connect to
    #[error("no servers available for {0}")]
    NoServers(String),

    /// `send` on a transport that is not open
    #[error("transport not connected")]
    NotConnected,

    /// Every candidate address refused or timed out
    #[error("connection failed to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// Batch could not be framed; nothing was written
    #[error("encode error: {0}")]
    Encode(#[source] ProtocolError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("operation timed out")]
    Timeout,
}

impl TransportError {
    fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            _ => Self::Io(e),
        }
    }
}

/// Where a connection goes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Peer {
    /// Fixed `host:port`
    Host { host: String, port: u16 },
    /// Named service resolved to a server list
    Service { name: String, servers: Vec<String> },
}

impl Peer {
    pub fn host(host: impl Into<String>, port: u16) -> Self {
        Self::Host {
            host: host.into(),
            port,
        }
    }

    pub fn service(name: impl Into<String>, servers: Vec<String>) -> Self {
        Self::Service {
            name: name.into(),
            servers,
        }
    }

    /// Pool key: `host:port` or the service name
    pub fn key(&self) -> String {
        match self {
            Self::Host { host, port } => format!("{}:{}", host, port),
            Self::Service { name, .. } => name.clone(),
        }
    }

    /// Whether reopening may reach a different server
    #[inline]
    pub fn is_service(&self) -> bool {
        matches!(self, Self::Service { .. })
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host { host, port } => write!(f, "<{}:{}>", host, port),
            Self::Service { name, .. } => write!(f, "<service {}>", name),
        }
    }
}

/// A framed request/reply channel to one peer
pub trait Transport: Send + fmt::Debug {
    fn open(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    fn close(&mut self);

    /// Deliver `batch` and return the peer's answer
    fn send(&mut self, batch: &MessageBatch) -> Result<ResultCode, TransportError>;
}

/// Builds transports for peers
pub trait Connector: Send + Sync {
    fn transport(&self, peer: &Peer, timeout: Duration) -> Box<dyn Transport>;
}

/// Connector producing [`TcpTransport`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn transport(&self, peer: &Peer, timeout: Duration) -> Box<dyn Transport> {
        Box::new(TcpTransport::new(peer.clone(), timeout))
    }
}

/// Blocking TCP transport
///
/// `timeout` applies to connect, read and write alike. Service peers try
/// their servers in random order until one accepts.
#[derive(Debug)]
pub struct TcpTransport {
    peer: Peer,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(peer: Peer, timeout: Duration) -> Self {
        Self {
            peer,
            timeout,
            stream: None,
        }
    }

    fn candidates(&self) -> Vec<String> {
        match &self.peer {
            Peer::Host { host, port } => vec![format!("{}:{}", host, port)],
            Peer::Service { servers, .. } => {
                let mut servers = servers.clone();
                servers.shuffle(&mut rand::rng());
                servers
            }
        }
    }

    fn connect(&self, addr: &str) -> io::Result<TcpStream> {
        let mut last_err = None;
        for sock_addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&sock_addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "address resolved to nothing")
        }))
    }

    fn configure_socket(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %self.peer, error = %e, "failed to set TCP_NODELAY");
        }

        let sock_ref = SockRef::from(stream);
        // rely on the kernel to drain unsent data on close
        sock_ref.set_linger(None)?;

        let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE);
        #[cfg(target_os = "linux")]
        let keepalive = keepalive.with_interval(TCP_KEEPALIVE);
        if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
            tracing::debug!(peer = %self.peer, error = %e, "failed to enable TCP keep-alive");
        }
        Ok(())
    }

    fn exchange(stream: &mut TcpStream, frame: &[u8]) -> Result<ResultCode, TransportError> {
        stream.write_all(frame).map_err(TransportError::from_io)?;
        stream.flush().map_err(TransportError::from_io)?;

        let mut reply = [0u8; wire::REPLY_LEN];
        stream.read_exact(&mut reply).map_err(TransportError::from_io)?;
        Ok(ResultCode::from_u8(reply[0])?)
    }
}

impl Transport for TcpTransport {
    fn open(&mut self) -> Result<(), TransportError> {
        self.close();

        let candidates = self.candidates();
        if candidates.is_empty() {
            return Err(TransportError::NoServers(self.peer.key()));
        }

        let mut last = None;
        for addr in candidates {
            match self.connect(&addr) {
                Ok(stream) => {
                    self.configure_socket(&stream)?;
                    if let Ok(remote) = stream.peer_addr() {
                        tracing::debug!(peer = %self.peer, remote = %remote, "connected");
                    }
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(peer = %self.peer, addr = %addr, error = %e, "connect attempt failed");
                    last = Some(TransportError::Connect { addr, source: e });
                }
            }
        }
        Err(last.unwrap_or_else(|| TransportError::NoServers(self.peer.key())))
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(e) = stream.shutdown(std::net::Shutdown::Both)
        {
            tracing::debug!(peer = %self.peer, error = %e, "error while closing connection");
        }
    }

    fn send(&mut self, batch: &MessageBatch) -> Result<ResultCode, TransportError> {
        let frame = wire::encode_frame(batch).map_err(TransportError::Encode)?;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let result = Self::exchange(stream, &frame);
        if result.is_err() {
            self.close();
        }
        result
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
