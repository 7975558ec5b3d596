//! Connection state shared between callers and the receive loop.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

/// Lifecycle state of a `Server` or `Client`.
///
/// ```text
///  Disconnected ──connect()──▶ Connecting ──open ok──▶ Connected
///       ▲                          │                    │    ▲
///       │                      open failed      fault   │    │ reopened
///       │◀─────────────────────────┘   (auto_reconnect) ▼    │
///       │                                         Reconnecting
///       │◀── Closing ◀── disconnect() / retry cap ──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    /// Returns true while a connection attempt is in flight.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Single-writer-at-a-time cell holding the live [`ConnectionState`].
///
/// Reads never block. Waiters are woken on every transition.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
    label: &'static str,
}

impl StateCell {
    pub(crate) fn new(label: &'static str) -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx, label }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Moves to `next`, returning the previous state.
    pub(crate) fn set(&self, next: ConnectionState) -> ConnectionState {
        let previous = self.tx.send_replace(next);
        if previous != next {
            debug!(endpoint = self.label, from = %previous, to = %next, "State transition");
        }
        previous
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Waits up to `limit` for the state to become Connected.
    ///
    /// Returns immediately with `false` if the state is not one that can
    /// still turn into Connected on its own.
    pub(crate) async fn wait_connected(&self, limit: Duration) -> bool {
        let mut rx = self.subscribe();
        let outcome = timeout(
            limit,
            rx.wait_for(|state| state.is_connected() || !state.is_pending()),
        )
        .await;
        match outcome {
            Ok(Ok(state)) => state.is_connected(),
            _ => false,
        }
    }
}
