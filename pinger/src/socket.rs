//! ICMP datagram socket transport.
//!
//! Owns the socket; never interprets packet contents. Readability is
//! exposed through [`tokio::io::unix::AsyncFd`] so a driver (or
//! [`crate::engine::Pinger::drive`]) can await it without polling.

use std::mem::MaybeUninit;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;

use crate::error::PingError;

const MAX_DATAGRAM_LEN: usize = 65535;

/// Address family an ICMP socket is opened for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Family {
    V4,
    V6,
}

impl From<SocketAddr> for Family {
    fn from(addr: SocketAddr) -> Self {
        if addr.is_ipv4() {
            Family::V4
        } else {
            Family::V6
        }
    }
}

/// Classify a socket-open failure: the platform rejecting the requested
/// family/protocol combination outright is distinct from other I/O errors.
fn map_open_error(error: std::io::Error) -> PingError {
    if error.kind() == std::io::ErrorKind::Unsupported {
        PingError::ProtocolUnsupported
    } else {
        PingError::Posix(error)
    }
}

/// An open, non-blocking ICMP datagram socket registered with the reactor.
pub struct IcmpTransport {
    inner: AsyncFd<Socket>,
}

impl IcmpTransport {
    /// Open an ICMP datagram socket for `family`.
    ///
    /// Uses `SOCK_DGRAM` rather than `SOCK_RAW`: on platforms that restrict
    /// raw ICMP to privileged processes, the datagram variant is the
    /// portable, unprivileged choice.
    pub fn open(family: Family) -> Result<Self, PingError> {
        let (domain, protocol) = match family {
            Family::V4 => (Domain::IPV4, Protocol::ICMPV4),
            Family::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(protocol)).map_err(map_open_error)?;
        socket.set_nonblocking(true).map_err(PingError::Posix)?;
        let inner = AsyncFd::new(socket).map_err(PingError::Posix)?;
        Ok(Self { inner })
    }

    /// Send one datagram. A partial write is treated as a failure.
    pub fn send(&self, target: SocketAddr, bytes: &[u8]) -> Result<usize, PingError> {
        let sent = self
            .inner
            .get_ref()
            .send_to(bytes, &target.into())
            .map_err(PingError::Posix)?;
        if sent != bytes.len() {
            return Err(PingError::Posix(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "partial ICMP datagram write",
            )));
        }
        Ok(sent)
    }

    /// Await readability, then receive up to [`MAX_DATAGRAM_LEN`] bytes.
    pub async fn recv(&self) -> Result<(Vec<u8>, SocketAddr), PingError> {
        loop {
            let mut guard = self.inner.readable().await.map_err(PingError::Posix)?;
            let mut buffer = vec![MaybeUninit::new(0u8); MAX_DATAGRAM_LEN];
            let result = guard.try_io(|inner| inner.get_ref().recv_from(&mut buffer));
            match result {
                Ok(Ok((size, peer))) => {
                    // SAFETY: `recv_from` initialized exactly `size` leading bytes.
                    let bytes: Vec<u8> = buffer[..size]
                        .iter()
                        .map(|b| unsafe { b.assume_init() })
                        .collect();
                    let peer = peer.as_socket().expect("ICMP socket only yields IP peers");
                    return Ok((bytes, peer));
                }
                Ok(Err(why)) => return Err(PingError::Posix(why)),
                Err(_would_block) => continue,
            }
        }
    }
}
