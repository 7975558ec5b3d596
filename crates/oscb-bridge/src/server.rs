//! OSC server: listens on `host:port_in` and dispatches to handlers.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::watch;

use oscb_protocol::{Atom, Packet};

use crate::config::ConnectionConfig;
use crate::endpoint::{Endpoint, Role};
use crate::error::Result;
use crate::lifecycle::{Lifecycle, LifecycleEvent};
use crate::state::ConnectionState;

/// Receiving side of the bridge.
///
/// The server binds `host:port_in` on [`Server::connect`] and runs every
/// registered handler whose pattern matches an incoming address. It can
/// also reply: to `host:port_out` when configured, otherwise to the peer
/// that sent the most recent datagram.
///
/// Binding port `0` picks a free port; the chosen port is kept across
/// reconnects and lifecycle restarts, so clients never need retargeting.
///
/// # Example
///
/// ```rust,no_run
/// # async fn demo() -> oscb_bridge::Result<()> {
/// use oscb_bridge::{ConnectionConfig, Server};
///
/// let server = Server::new(ConnectionConfig::server("localhost", 7400))?;
/// server.register_handler("/test/m4l", |address, args| {
///     println!("{address} {args:?}");
/// })?;
/// server.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    endpoint: Endpoint,
}

impl Server {
    /// Creates a disconnected server.
    ///
    /// # Errors
    ///
    /// - `BridgeError::Configuration` if `port_in` is missing, the host is
    ///   empty, or the reconnect policy is invalid
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate_server()?;
        Ok(Self {
            endpoint: Endpoint::new(Role::Server, config),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.endpoint.config()
    }

    /// Binds the socket and starts receiving. Idempotent.
    pub async fn connect(&self) -> Result<()> {
        self.endpoint.connect().await
    }

    /// Stops receiving and releases the port. Idempotent.
    pub async fn disconnect(&self) {
        self.endpoint.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.endpoint.state()
    }

    /// Subscribes to state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.endpoint.state_changes()
    }

    /// Bound address while connected.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.local_addr().await
    }

    /// Source address of the most recent datagram.
    pub fn last_peer(&self) -> Option<SocketAddr> {
        self.endpoint.last_peer()
    }

    /// Adds a handler for addresses matching `pattern`.
    pub fn register_handler<F>(&self, pattern: &str, callback: F) -> Result<()>
    where
        F: Fn(&str, &[Atom]) + Send + Sync + 'static,
    {
        self.endpoint.handlers().register(pattern, callback)
    }

    pub fn handler_count(&self) -> usize {
        self.endpoint.handlers().handler_count()
    }

    /// Sends a reply. Returns false if nothing was sent.
    pub async fn send(&self, address: &str, args: &[Atom]) -> bool {
        self.endpoint.send(address, args).await
    }

    pub async fn send_packet(&self, packet: &Packet) -> bool {
        self.endpoint.send_packet(packet).await
    }

    /// Reacts to a host lifecycle event by name (`liveset_loaded`, ...).
    pub async fn handle_lifecycle_event(&self, name: &str) {
        self.endpoint
            .handle_lifecycle_event(&LifecycleEvent::parse(name))
            .await;
    }
}

#[async_trait]
impl Lifecycle for Server {
    async fn on_lifecycle_event(&self, event: &LifecycleEvent) {
        self.endpoint.handle_lifecycle_event(event).await;
    }
}
