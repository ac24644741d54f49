//! UDP socket wrapper
//!
//! Blocking UDP socket built with `socket2` so buffer sizes, read timeouts
//! and multicast options can be set before use. Reads are bounded by a
//! timeout; a timeout surfaces as `Ok(None)` rather than an error.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Socket configuration errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,

    #[error("Multicast requires an IPv4 group address, got {0}")]
    NotMulticast(SocketAddr),
}

/// UDP socket for media and control traffic
pub struct MediaSocket {
    inner: Socket,
}

impl MediaSocket {
    /// Create a socket bound to the given address
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let socket = Self::new_socket(addr)?;
        socket.bind(&addr.into())?;
        Ok(MediaSocket { inner: socket })
    }

    /// Create a socket bound to `bind_addr` that has joined an IPv4 multicast
    /// group on the given interface
    pub fn bind_multicast(
        bind_addr: SocketAddr,
        group: Ipv4Addr,
        interface: Ipv4Addr,
    ) -> Result<Self, SocketError> {
        if !group.is_multicast() {
            return Err(SocketError::NotMulticast(SocketAddr::from((group, bind_addr.port()))));
        }
        let socket = Self::new_socket(bind_addr)?;
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(&group, &interface)?;
        Ok(MediaSocket { inner: socket })
    }

    fn new_socket(addr: SocketAddr) -> Result<Socket, SocketError> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        // Several receivers on one host may share the multicast port
        socket.set_reuse_address(true)?;
        Ok(socket)
    }

    /// Limit multicast datagrams to the local segment (`ttl = 1`) or beyond
    pub fn set_multicast_ttl(&self, ttl: u32) -> Result<(), SocketError> {
        self.inner.set_multicast_ttl_v4(ttl)?;
        Ok(())
    }

    /// Bound every read; `None` blocks indefinitely
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        self.inner.set_read_timeout(timeout)?;
        Ok(())
    }

    /// Set the send buffer size
    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        self.inner.set_send_buffer_size(size)?;
        Ok(())
    }

    /// Set the receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        self.inner.set_recv_buffer_size(size)?;
        Ok(())
    }

    /// Get the receive buffer size
    pub fn recv_buffer_size(&self) -> Result<usize, SocketError> {
        Ok(self.inner.recv_buffer_size()?)
    }

    /// Get the local address this socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Send a datagram to the given address
    pub fn send_to(&self, buf: &[u8], target: SocketAddr) -> Result<usize, SocketError> {
        Ok(self.inner.send_to(buf, &target.into())?)
    }

    /// Receive one datagram
    ///
    /// Returns `Ok(None)` when the read timeout elapsed without data or a
    /// signal interrupted the wait. Callers re-check their shutdown signal
    /// and call again.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, SocketError> {
        // SAFETY: an initialised byte slice is a valid `[MaybeUninit<u8>]`,
        // and recv only writes into it.
        let uninit_buf = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };

        match self.inner.recv_from(uninit_buf) {
            Ok((n, addr)) => Ok(Some((
                n,
                addr.as_socket().ok_or(SocketError::InvalidAddress)?,
            ))),
            Err(e) if no_datagram(e.kind()) => Ok(None),
            Err(e) => Err(SocketError::Io(e)),
        }
    }
}

/// Errors that only mean nothing was received this time
///
/// `recvfrom` with `SO_RCVTIMEO` is never restarted after a signal handler,
/// even one installed with `SA_RESTART`, so ctrl-c surfaces as `Interrupted`.
fn no_datagram(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}
