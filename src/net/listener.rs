//! Listening socket shared between the master and its HTTP workers.
//!
//! # Responsibilities
//! - Bind the configured interface/port with SO_REUSEADDR, non-blocking
//! - Adopt a socket handed over by a previous master (restart)
//! - Accept one client at a time without blocking
//! - Export the descriptor before re-exec

use std::env;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg};
use socket2::{Domain, Protocol, Socket, Type};

/// Descriptor of the listening socket inherited across a restart.
pub const SOCKET_FD_ENV: &str = "PREFORK_HTTP_SOCKET_FD";

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to bind to address.
    Bind(io::Error),
    /// The inherited descriptor is unusable.
    Inherit(String),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind(e) => write!(f, "Failed to bind: {}", e),
            ListenerError::Inherit(msg) => write!(f, "Failed to adopt inherited socket: {}", msg),
        }
    }
}

impl std::error::Error for ListenerError {}

impl From<ListenerError> for io::Error {
    fn from(e: ListenerError) -> Self {
        match e {
            ListenerError::Bind(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }
}

/// A non-blocking listening socket that survives `fork`.
#[derive(Debug)]
pub struct SharedListener {
    socket: Socket,
    local_addr: SocketAddr,
}

impl SharedListener {
    /// Bind `address` ("host:port", IPv6 hosts bracketed).
    pub fn bind(address: &str, backlog: i32) -> Result<Self, ListenerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ListenerError::Bind(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(ListenerError::Bind)?;
        socket.set_reuse_address(true).map_err(ListenerError::Bind)?;
        socket.set_nonblocking(true).map_err(ListenerError::Bind)?;
        socket.set_cloexec(true).map_err(ListenerError::Bind)?;
        socket.bind(&addr.into()).map_err(ListenerError::Bind)?;
        socket.listen(backlog).map_err(ListenerError::Bind)?;

        let listener = Self::from_socket(socket).map_err(ListenerError::Bind)?;
        tracing::info!(address = %listener.local_addr, backlog, "Listener bound");
        Ok(listener)
    }

    /// Adopt the socket named by `PREFORK_HTTP_SOCKET_FD`, if any.
    pub fn inherited() -> Result<Option<Self>, ListenerError> {
        let Ok(value) = env::var(SOCKET_FD_ENV) else {
            return Ok(None);
        };
        env::remove_var(SOCKET_FD_ENV);

        let fd: RawFd = value
            .trim()
            .parse()
            .map_err(|_| ListenerError::Inherit(format!("invalid descriptor '{}'", value)))?;
        fcntl(fd, FcntlArg::F_GETFD)
            .map_err(|e| ListenerError::Inherit(format!("descriptor {}: {}", fd, e)))?;

        // SAFETY: the descriptor was exported by the previous master for us and
        // nothing else in this process owns it.
        let socket = unsafe { Socket::from_raw_fd(fd) };
        socket
            .set_cloexec(true)
            .and_then(|()| socket.set_nonblocking(true))
            .map_err(|e| ListenerError::Inherit(e.to_string()))?;

        let listener = Self::from_socket(socket).map_err(|e| ListenerError::Inherit(e.to_string()))?;
        tracing::info!(address = %listener.local_addr, fd, "Adopted inherited listener");
        Ok(Some(listener))
    }

    /// Inherited socket when present, otherwise a fresh bind.
    pub fn inherited_or_bind(address: &str, backlog: i32) -> Result<Self, ListenerError> {
        match Self::inherited()? {
            Some(listener) => Ok(listener),
            None => Self::bind(address, backlog),
        }
    }

    fn from_socket(socket: Socket) -> io::Result<Self> {
        let local_addr = socket
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not an inet socket"))?;
        Ok(Self { socket, local_addr })
    }

    /// Accept one pending client. `None` when nobody is waiting or the
    /// client went away before we got to it.
    pub fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        match self.socket.accept() {
            Ok((socket, addr)) => {
                let peer = addr
                    .as_socket()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not an inet peer"))?;
                Ok(Some((socket.into(), peer)))
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Keep the descriptor open across `exec` and tell the next process
    /// where to find it.
    pub fn export_for_reexec(&self) -> io::Result<()> {
        self.socket.set_cloexec(false)?;
        env::set_var(SOCKET_FD_ENV, self.socket.as_raw_fd().to_string());
        tracing::info!(fd = self.socket.as_raw_fd(), "Listener exported for restart");
        Ok(())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self {
            socket: self.socket.try_clone()?,
            local_addr: self.local_addr,
        })
    }

    pub fn into_std(self) -> std::net::TcpListener {
        self.socket.into()
    }
}

impl AsFd for SharedListener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl AsRawFd for SharedListener {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_without_client_is_none() {
        let listener = SharedListener::bind("127.0.0.1:0", 8).unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.accept().unwrap().is_none());
    }

    #[test]
    fn test_accept_client() {
        let listener = SharedListener::bind("127.0.0.1:0", 8).unwrap();
        let _client = TcpStream::connect(listener.local_addr()).unwrap();

        let mut accepted = None;
        for _ in 0..100 {
            if let Some(conn) = listener.accept().unwrap() {
                accepted = Some(conn);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let (_stream, peer) = accepted.expect("client was not accepted");
        assert!(peer.ip().is_loopback());
    }

    #[test]
    fn test_bad_address() {
        assert!(matches!(
            SharedListener::bind("nonsense", 8),
            Err(ListenerError::Bind(_))
        ));
    }

    #[test]
    fn test_ipv6_bind() {
        // Hosts without IPv6 cannot run this test.
        if let Ok(listener) = SharedListener::bind("[::1]:0", 8) {
            assert!(listener.local_addr().is_ipv6());
        }
    }
}
