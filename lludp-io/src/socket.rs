//! UDP socket wrapper
//!
//! A circuit owns one UDP socket connected to one simulator endpoint. The
//! receive loop runs on a dedicated thread, so the socket stays in blocking
//! mode with a read timeout; the timeout lets the loop observe shutdown.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, ErrorKind};
use std::mem::MaybeUninit;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Socket configuration and I/O errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Read timed out")]
    Timeout,

    #[error("Invalid socket address")]
    InvalidAddress,
}

/// UDP socket bound locally and connected to one remote endpoint
pub struct UdpEndpointSocket {
    inner: Socket,
}

impl UdpEndpointSocket {
    /// Bind a socket and connect it to `remote`.
    pub fn connect(local: SocketAddr, remote: SocketAddr) -> Result<Self, SocketError> {
        let domain = if local.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&local.into())?;
        socket.connect(&remote.into())?;

        Ok(UdpEndpointSocket { inner: socket })
    }

    /// Set the read timeout for [`recv`](Self::recv).
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), SocketError> {
        self.inner.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        self.inner.set_send_buffer_size(size)?;
        Ok(())
    }

    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), SocketError> {
        self.inner.set_recv_buffer_size(size)?;
        Ok(())
    }

    /// Local address the socket is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Remote endpoint the socket is connected to
    pub fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .peer_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Send one datagram to the connected endpoint.
    pub fn send(&self, buf: &[u8]) -> Result<usize, SocketError> {
        Ok(self.inner.send(buf)?)
    }

    /// Receive one datagram from the connected endpoint.
    ///
    /// Returns [`SocketError::Timeout`] when the read timeout elapses.
    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        // socket2 hands out MaybeUninit buffers; the transport reuses one
        // fully initialized receive buffer, so the cast is sound.
        let uninit = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };

        match self.inner.recv(uninit) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Err(SocketError::Timeout)
            }
            Err(e) => Err(SocketError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;

    fn any_local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_connect_and_local_addr() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = UdpEndpointSocket::connect(any_local(), peer.local_addr().unwrap()).unwrap();
        assert!(socket.local_addr().unwrap().port() > 0);
        assert_eq!(socket.peer_addr().unwrap(), peer.local_addr().unwrap());
    }

    #[test]
    fn test_send_recv_roundtrip() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = UdpEndpointSocket::connect(any_local(), peer.local_addr().unwrap()).unwrap();

        socket.send(b"ping").unwrap();
        let mut buf = [0u8; 64];
        let (n, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        peer.send_to(b"pong", from).unwrap();
        let n = socket.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn test_read_timeout() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = UdpEndpointSocket::connect(any_local(), peer.local_addr().unwrap()).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();

        let mut buf = [0u8; 64];
        assert!(matches!(socket.recv(&mut buf), Err(SocketError::Timeout)));
    }

    #[test]
    fn test_buffer_sizes() {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        let socket = UdpEndpointSocket::connect(any_local(), peer.local_addr().unwrap()).unwrap();
        socket.set_send_buffer_size(262144).unwrap();
        socket.set_recv_buffer_size(262144).unwrap();
    }
}
