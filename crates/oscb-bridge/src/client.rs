//! OSC client: sends to `host:port_out` from an ephemeral port.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::watch;

use oscb_protocol::{Atom, Packet};

use crate::config::ConnectionConfig;
use crate::endpoint::{Endpoint, Role};
use crate::error::Result;
use crate::lifecycle::{Lifecycle, LifecycleEvent};
use crate::state::ConnectionState;

/// Sending side of the bridge.
///
/// Replies arriving on the client's ephemeral port are dispatched to
/// handlers registered on the client.
#[derive(Debug)]
pub struct Client {
    endpoint: Endpoint,
}

impl Client {
    /// Creates a disconnected client.
    ///
    /// # Errors
    ///
    /// - `BridgeError::Configuration` if `port_out` is missing or zero
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate_client()?;
        Ok(Self {
            endpoint: Endpoint::new(Role::Client, config),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.endpoint.config()
    }

    pub async fn connect(&self) -> Result<()> {
        self.endpoint.connect().await
    }

    pub async fn disconnect(&self) {
        self.endpoint.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.endpoint.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.endpoint.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.endpoint.state_changes()
    }

    /// Ephemeral address replies should be sent to.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.endpoint.local_addr().await
    }

    pub fn register_handler<F>(&self, pattern: &str, callback: F) -> Result<()>
    where
        F: Fn(&str, &[Atom]) + Send + Sync + 'static,
    {
        self.endpoint.handlers().register(pattern, callback)
    }

    pub fn handler_count(&self) -> usize {
        self.endpoint.handlers().handler_count()
    }

    /// Sends one message to the server.
    ///
    /// Returns true once the datagram is handed to the socket. While
    /// reconnecting, waits at most `send_wait` before giving up; nothing
    /// is queued.
    pub async fn send(&self, address: &str, args: &[Atom]) -> bool {
        self.endpoint.send(address, args).await
    }

    pub async fn send_packet(&self, packet: &Packet) -> bool {
        self.endpoint.send_packet(packet).await
    }

    pub async fn handle_lifecycle_event(&self, name: &str) {
        self.endpoint
            .handle_lifecycle_event(&LifecycleEvent::parse(name))
            .await;
    }
}

#[async_trait]
impl Lifecycle for Client {
    async fn on_lifecycle_event(&self, event: &LifecycleEvent) {
        self.endpoint.handle_lifecycle_event(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BridgeError, ConfigError};

    #[test]
    fn test_new_requires_port_out() {
        let result = Client::new(ConnectionConfig::server("localhost", 7400));
        assert!(matches!(
            result,
            Err(BridgeError::Configuration(ConfigError::MissingPort { field: "port_out", .. }))
        ));
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = Client::new(ConnectionConfig::client("127.0.0.1", 9)).unwrap();
        assert!(!client.send("/test/m4l", &[Atom::from("hello")]).await);
    }

    #[tokio::test]
    async fn test_connect_uses_ephemeral_port() {
        let client = Client::new(ConnectionConfig::client("127.0.0.1", 9)).unwrap();
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_ne!(client.local_addr().await.unwrap().port(), 9);
        assert!(client.send("/test/m4l", &[Atom::from("hello")]).await);
        client.disconnect().await;
    }
}
