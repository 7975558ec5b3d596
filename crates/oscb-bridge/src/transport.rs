//! UDP transport owned by a `Server` or `Client`.
//!
//! A [`UdpTransport`] wraps exactly one socket. It knows nothing about OSC:
//! it moves datagrams and reports failures. `close()` may be called from
//! any task and wakes a pending [`UdpTransport::try_receive`].
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{lookup_host, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use oscb_protocol::codec::MAX_DATAGRAM_SIZE;

use crate::error::TransportError;

/// Upper bound for a single `send_to`.
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// How a transport obtains its socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Bind `addr` and receive on it; replies go to `reply_to` if set.
    Listen {
        addr: SocketAddr,
        reply_to: Option<SocketAddr>,
    },
    /// Bind an ephemeral port and send to `peer` by default.
    Ephemeral { peer: SocketAddr },
}

/// One received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub bytes: Vec<u8>,
    pub from: SocketAddr,
}

/// A single UDP socket plus a close signal.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peer: Option<SocketAddr>,
    closed: CancellationToken,
}

impl UdpTransport {
    /// Binds the socket described by `binding`.
    pub async fn open(binding: Binding) -> Result<Self, TransportError> {
        let (bind_addr, peer) = match binding {
            Binding::Listen { addr, reply_to } => (addr, reply_to),
            Binding::Ephemeral { peer } => (unspecified_for(peer), Some(peer)),
        };

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| TransportError::Bind {
            addr: bind_addr,
            source,
        })?;

        debug!(local = %local_addr, peer = ?peer, "UDP transport opened");

        Ok(Self {
            socket,
            local_addr,
            peer,
            closed: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Default destination for [`UdpTransport::try_send`].
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Marks the transport closed and wakes any pending receive.
    ///
    /// Idempotent. The socket itself is released when the last owner drops
    /// the transport.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(local = %self.local_addr, "UDP transport closed");
            self.closed.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Sends `bytes` to the default peer.
    pub async fn try_send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let peer = self.peer.ok_or(TransportError::NoPeer)?;
        self.try_send_to(bytes, peer).await
    }

    /// Sends `bytes` as one datagram to `peer`.
    pub async fn try_send_to(&self, bytes: &[u8], peer: SocketAddr) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        match timeout(SEND_TIMEOUT, self.socket.send_to(bytes, peer)).await {
            Ok(Ok(sent)) if sent == bytes.len() => {
                trace!(peer = %peer, bytes = sent, "Datagram sent");
                Ok(())
            }
            Ok(Ok(sent)) => Err(TransportError::Send {
                peer,
                source: std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short send: {sent} of {} bytes", bytes.len()),
                ),
            }),
            Ok(Err(source)) => Err(TransportError::Send { peer, source }),
            Err(_) => Err(TransportError::Timeout { peer }),
        }
    }

    /// Waits for the next datagram, reading it into `buf`.
    ///
    /// `buf` is scratch space reused across calls (see [`receive_buffer`]);
    /// only the received bytes are copied out. Returns `Ok(None)` once the
    /// transport is closed.
    pub async fn try_receive(&self, buf: &mut [u8]) -> Result<Option<Datagram>, TransportError> {
        tokio::select! {
            _ = self.closed.cancelled() => Ok(None),
            result = self.socket.recv_from(buf) => {
                let (len, from) = result.map_err(TransportError::Receive)?;
                trace!(from = %from, bytes = len, "Datagram received");
                Ok(Some(Datagram { bytes: buf[..len].to_vec(), from }))
            }
        }
    }
}

/// Scratch buffer large enough for any datagram.
pub fn receive_buffer() -> Vec<u8> {
    vec![0u8; MAX_DATAGRAM_SIZE]
}

/// Resolves `host:port`, preferring IPv4 so that `localhost` means the same
/// address to a server binding it and a client sending to it.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    let resolve_error = |reason: String| TransportError::Resolve {
        host: host.to_string(),
        port,
        reason,
    };

    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| resolve_error(e.to_string()))?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| resolve_error("no addresses found".to_string()))
}

fn unspecified_for(peer: SocketAddr) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}
