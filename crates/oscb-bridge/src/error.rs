//! Error types for the OSC bridge.
//!
//! The bridge never surfaces these as process-fatal failures: transport
//! faults drive the reconnect path, malformed packets are dropped, and
//! `send()` reports a plain `bool`. The types exist so that `connect()`,
//! `register_handler()` and config loading can say *why* they failed.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use oscb_protocol::{DecodeError, EncodeError, PatternError, TypeMismatch};
use thiserror::Error;

// ============================================================================
// Transport Errors
// ============================================================================

/// Failures of the underlying datagram socket.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Host name could not be resolved to a socket address.
    #[error("Failed to resolve {host}:{port}: {reason}")]
    Resolve {
        host: String,
        port: u16,
        reason: String,
    },

    /// The socket could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// A datagram could not be sent.
    #[error("Failed to send to {peer}: {source}")]
    Send {
        peer: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Reading from the socket failed.
    #[error("Failed to receive: {0}")]
    Receive(#[source] io::Error),

    /// A send did not complete within the send timeout.
    #[error("Send to {peer} timed out")]
    Timeout { peer: SocketAddr },

    /// No destination is known (server without a peer yet).
    #[error("No peer address to send to")]
    NoPeer,

    /// The transport has been closed.
    #[error("Transport closed")]
    Closed,
}

impl TransportError {
    /// Returns true for errors that do not indicate a broken socket.
    ///
    /// ICMP "port unreachable" shows up as refused/reset on some platforms
    /// when the peer is simply not listening yet; reopening our own socket
    /// would not help. The same goes for a datagram the kernel refuses as
    /// too large (EMSGSIZE) or otherwise invalid for this destination.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Send { source, .. } | TransportError::Receive(source) => {
                is_message_too_long(source)
                    || matches!(
                        source.kind(),
                        io::ErrorKind::ConnectionRefused
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                            | io::ErrorKind::InvalidInput
                    )
            }
            TransportError::Timeout { .. } | TransportError::NoPeer => true,
            TransportError::Resolve { .. } | TransportError::Bind { .. } | TransportError::Closed => {
                false
            }
        }
    }
}

#[cfg(unix)]
fn is_message_too_long(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EMSGSIZE)
}

#[cfg(not(unix))]
fn is_message_too_long(_err: &io::Error) -> bool {
    false
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Invalid or unreadable connection configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Host must not be empty")]
    EmptyHost,

    #[error("{role} requires {field} to be set")]
    MissingPort {
        role: &'static str,
        field: &'static str,
    },

    #[error("Client port_out must not be 0")]
    ZeroPeerPort,

    #[error("Invalid reconnect policy: {0}")]
    InvalidPolicy(String),

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

// ============================================================================
// Bridge Error
// ============================================================================

/// Top-level error for bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Malformed packet: {0}")]
    MalformedPacket(#[from] DecodeError),

    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Invalid address pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] EncodeError),
}

/// Convenience Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

// ============================================================================
// Tests
// ============================================================================
