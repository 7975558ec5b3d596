//! Connection state machine shared by [`Server`](crate::Server) and
//! [`Client`](crate::Client).
//!
//! An [`Endpoint`] owns one transport slot and at most one receive session.
//! The session task pumps datagrams into the handler registry and, when the
//! transport faults, reopens it using the configured [`ReconnectPolicy`].
//!
//! # Architecture
//!
//! ```text
//!  caller ──send()──▶ ┌──────────────────┐ ◀──── try_receive ────┐
//!                     │  transport slot  │                       │
//!  caller ──connect()─┤  (tokio Mutex)   │      ┌────────────────┴──┐
//!         disconnect()│                  │      │   session task    │
//!         lifecycle   └──────────────────┘      │  pump / reopen    │
//!             │                                 └─────────┬─────────┘
//!             ▼                                           │ dispatch
//!     ┌───────────────┐   state (watch)                   ▼
//!     │ session mutex │ ──────────────────▶      ┌──────────────────┐
//!     └───────────────┘                          │ HandlerRegistry  │
//!                                                └──────────────────┘
//! ```
//!
//! A send that hits a non-transient error closes the transport. The session
//! task sees the closed transport and runs the reconnect path, so faults
//! from either direction are handled in one place.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.
//!
//! [`ReconnectPolicy`]: crate::config::ReconnectPolicy

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use oscb_protocol::{codec, Atom, Packet};

use crate::config::ConnectionConfig;
use crate::error::{Result, TransportError};
use crate::lifecycle::{LifecycleAction, LifecycleEvent};
use crate::registry::HandlerRegistry;
use crate::state::{ConnectionState, StateCell};
use crate::transport::{receive_buffer, resolve, Binding, Datagram, UdpTransport};

/// Which side of the bridge an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Server,
    Client,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// State reachable from both the caller-facing handle and the session task.
struct Shared {
    role: Role,
    config: ConnectionConfig,
    state: StateCell,

    /// Current transport. Held across a transmit so sends are serialized.
    transport: Mutex<Option<Arc<UdpTransport>>>,

    handlers: HandlerRegistry,

    /// Source of the most recent datagram; reply target for servers
    /// without a fixed `port_out`.
    last_peer: std::sync::Mutex<Option<SocketAddr>>,

    /// `connect()` called and not yet undone by `disconnect()`.
    wanted: AtomicBool,

    /// Port the server actually bound, so reconnects reuse it.
    bound_port: AtomicU16,
}

/// Why the receive pump stopped.
enum PumpExit {
    Cancelled,
    Fault,
}

impl Shared {
    fn label(&self) -> &'static str {
        self.role.label()
    }

    fn last_peer(&self) -> Option<SocketAddr> {
        *self.last_peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_peer(&self, peer: SocketAddr) {
        *self.last_peer.lock().unwrap_or_else(PoisonError::into_inner) = Some(peer);
    }

    async fn binding(&self) -> std::result::Result<Binding, TransportError> {
        let host = self.config.host.as_str();
        match self.role {
            Role::Server => {
                let port = match self.bound_port.load(Ordering::Acquire) {
                    0 => self.config.port_in.unwrap_or(0),
                    remembered => remembered,
                };
                let addr = resolve(host, port).await?;
                let reply_to = match self.config.port_out {
                    Some(port_out) => Some(resolve(host, port_out).await?),
                    None => None,
                };
                Ok(Binding::Listen { addr, reply_to })
            }
            Role::Client => {
                let peer = resolve(host, self.config.port_out.unwrap_or(0)).await?;
                Ok(Binding::Ephemeral { peer })
            }
        }
    }

    /// Opens a fresh transport and installs it in the slot.
    async fn open(&self) -> std::result::Result<Arc<UdpTransport>, TransportError> {
        let transport = Arc::new(UdpTransport::open(self.binding().await?).await?);
        if self.role == Role::Server {
            self.bound_port
                .store(transport.local_addr().port(), Ordering::Release);
        }
        *self.transport.lock().await = Some(Arc::clone(&transport));
        Ok(transport)
    }

    /// Empties the slot and closes whatever was in it.
    async fn release(&self) {
        if let Some(transport) = self.transport.lock().await.take() {
            transport.close();
        }
    }

    /// Reopens the transport with exponential backoff.
    ///
    /// Returns `None` if cancelled or once the policy is exhausted; in the
    /// latter case the state ends Disconnected.
    async fn reopen(&self, cancel: &CancellationToken) -> Option<Arc<UdpTransport>> {
        let policy = &self.config.reconnect;
        let mut delay = policy.initial_delay;
        let mut attempts: u32 = 0;

        loop {
            // open() resolves the host name, which can stall for the resolver timeout
            let opened = tokio::select! {
                _ = cancel.cancelled() => return None,
                opened = self.open() => opened,
            };

            match opened {
                Ok(transport) => {
                    self.state.set(ConnectionState::Connected);
                    info!(
                        endpoint = self.label(),
                        local = %transport.local_addr(),
                        attempts,
                        "Reconnected"
                    );
                    return Some(transport);
                }
                Err(e) => {
                    attempts += 1;
                    if policy.is_exhausted(attempts) {
                        warn!(
                            endpoint = self.label(),
                            attempts,
                            error = %e,
                            "Reconnect attempts exhausted"
                        );
                        self.state.set(ConnectionState::Closing);
                        self.state.set(ConnectionState::Disconnected);
                        return None;
                    }

                    debug!(
                        endpoint = self.label(),
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Reconnect attempt failed"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = sleep(delay) => {}
                    }
                    delay = policy.next_delay(delay);
                }
            }
        }
    }

    /// Receives and dispatches until cancelled or the transport fails.
    async fn pump(&self, transport: Arc<UdpTransport>, cancel: &CancellationToken) -> PumpExit {
        let mut buf = receive_buffer();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return PumpExit::Cancelled,

                received = transport.try_receive(&mut buf) => match received {
                    Ok(Some(datagram)) => self.deliver(datagram),
                    Ok(None) if cancel.is_cancelled() => return PumpExit::Cancelled,
                    Ok(None) => {
                        warn!(endpoint = self.label(), "Transport closed after send fault");
                        return PumpExit::Fault;
                    }
                    Err(e) if e.is_transient() => {
                        debug!(endpoint = self.label(), error = %e, "Transient receive error");
                    }
                    Err(e) => {
                        warn!(endpoint = self.label(), error = %e, "Receive failed");
                        return PumpExit::Fault;
                    }
                },
            }
        }
    }

    fn deliver(&self, datagram: Datagram) {
        self.record_peer(datagram.from);

        let packet = match codec::decode(&datagram.bytes) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(
                    endpoint = self.label(),
                    from = %datagram.from,
                    bytes = datagram.bytes.len(),
                    error = %e,
                    "Dropping malformed packet"
                );
                return;
            }
        };

        for message in packet.messages() {
            let matched = self.handlers.dispatch_message(message);
            debug!(
                endpoint = self.label(),
                address = %message.address,
                args = message.args.len(),
                matched,
                "Message received"
            );
        }
    }
}

/// Body of the session task.
///
/// Starts from `transport` if one was just opened, otherwise reconnects
/// first.
async fn run_session(
    shared: Arc<Shared>,
    mut transport: Option<Arc<UdpTransport>>,
    cancel: CancellationToken,
) {
    loop {
        let active = match transport.take() {
            Some(active) => active,
            None => match shared.reopen(&cancel).await {
                Some(active) => active,
                None => return,
            },
        };

        match shared.pump(active, &cancel).await {
            PumpExit::Cancelled => return,
            PumpExit::Fault => {
                shared.release().await;
                if !shared.config.auto_reconnect {
                    shared.state.set(ConnectionState::Disconnected);
                    return;
                }
                shared.state.set(ConnectionState::Reconnecting);
            }
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Running receive task plus the token that stops it.
struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Session {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Caller-facing handle behind `Server` and `Client`.
pub(crate) struct Endpoint {
    shared: Arc<Shared>,

    /// Serializes connect, disconnect and lifecycle restarts.
    session: Mutex<Option<Session>>,

    /// Parent of every session token; cancelled on drop.
    shutdown: CancellationToken,
}

impl Endpoint {
    pub(crate) fn new(role: Role, config: ConnectionConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                role,
                config,
                state: StateCell::new(role.label()),
                transport: Mutex::new(None),
                handlers: HandlerRegistry::new(),
                last_peer: std::sync::Mutex::new(None),
                wanted: AtomicBool::new(false),
                bound_port: AtomicU16::new(0),
            }),
            session: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub(crate) fn handlers(&self) -> &HandlerRegistry {
        &self.shared.handlers
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub(crate) fn state_changes(&self) -> tokio::sync::watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub(crate) async fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .transport
            .lock()
            .await
            .as_ref()
            .map(|transport| transport.local_addr())
    }

    pub(crate) fn last_peer(&self) -> Option<SocketAddr> {
        self.shared.last_peer()
    }

    /// Opens the transport and starts the receive session.
    ///
    /// A no-op while already Connected, or while a session is still
    /// connecting or reconnecting in the background.
    pub(crate) async fn connect(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        self.shared.wanted.store(true, Ordering::SeqCst);

        let state = self.state();
        let running = session.as_ref().is_some_and(Session::is_running);
        if running && (state.is_connected() || state.is_pending()) {
            debug!(endpoint = self.shared.label(), %state, "Already connected");
            return Ok(());
        }

        self.start(&mut session, ConnectionState::Connecting)
            .await
            .map_err(Into::into)
    }

    /// Stops the session and releases the socket. Idempotent.
    pub(crate) async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        self.shared.wanted.store(false, Ordering::SeqCst);

        let was = self.state();
        if session.is_some() {
            self.shared.state.set(ConnectionState::Closing);
        }
        self.stop(&mut session).await;
        self.shared.release().await;
        self.shared.state.set(ConnectionState::Disconnected);

        if was != ConnectionState::Disconnected {
            info!(endpoint = self.shared.label(), "Disconnected");
        }
    }

    /// Applies a host lifecycle event. Never fails.
    pub(crate) async fn handle_lifecycle_event(&self, event: &LifecycleEvent) {
        let action = event.action();
        let mut session = self.session.lock().await;

        if !self.shared.wanted.load(Ordering::SeqCst) {
            debug!(endpoint = self.shared.label(), %event, "Lifecycle event ignored: not connected");
            return;
        }

        match action {
            LifecycleAction::Ignore => {
                debug!(endpoint = self.shared.label(), %event, "Lifecycle event ignored");
                return;
            }
            LifecycleAction::Verify => {
                let healthy = self.is_connected() && session.as_ref().is_some_and(Session::is_running);
                if healthy {
                    debug!(endpoint = self.shared.label(), %event, "Connection verified");
                    return;
                }
            }
            LifecycleAction::Restart => {}
        }

        info!(endpoint = self.shared.label(), %event, "Restarting transport for lifecycle event");
        if let Err(e) = self.start(&mut session, ConnectionState::Reconnecting).await {
            warn!(endpoint = self.shared.label(), %event, error = %e, "Restart after lifecycle event failed");
        }
    }

    /// Sends one message. Returns whether it was handed to the socket.
    pub(crate) async fn send(&self, address: &str, args: &[Atom]) -> bool {
        match codec::encode(address, args) {
            Ok(bytes) => self.transmit(&bytes).await,
            Err(e) => {
                warn!(endpoint = self.shared.label(), address, error = %e, "Failed to encode message");
                false
            }
        }
    }

    pub(crate) async fn send_packet(&self, packet: &Packet) -> bool {
        match codec::encode_packet(packet) {
            Ok(bytes) => self.transmit(&bytes).await,
            Err(e) => {
                warn!(endpoint = self.shared.label(), error = %e, "Failed to encode packet");
                false
            }
        }
    }

    async fn transmit(&self, bytes: &[u8]) -> bool {
        let shared = &self.shared;
        let state = shared.state.get();

        if !state.is_connected() {
            let may_wait = shared.config.auto_reconnect && state.is_pending();
            if !may_wait || !shared.state.wait_connected(shared.config.send_wait).await {
                debug!(endpoint = shared.label(), %state, "Send dropped: not connected");
                return false;
            }
        }

        let slot = shared.transport.lock().await;
        let Some(transport) = slot.as_ref() else {
            debug!(endpoint = shared.label(), "Send dropped: no transport");
            return false;
        };
        let Some(peer) = transport.peer().or_else(|| shared.last_peer()) else {
            debug!(endpoint = shared.label(), "Send dropped: no peer to reply to");
            return false;
        };

        match transport.try_send_to(bytes, peer).await {
            Ok(()) => true,
            Err(e) if e.is_transient() => {
                debug!(endpoint = shared.label(), error = %e, "Transient send failure");
                false
            }
            Err(e) => {
                warn!(endpoint = shared.label(), error = %e, "Send failed; closing transport");
                transport.close();
                false
            }
        }
    }

    /// Replaces any running session with a freshly opened transport.
    ///
    /// `entering` is the state shown while the open is in flight. When a
    /// restart (`Reconnecting`) cannot open the socket and auto-reconnect is
    /// on, a background session keeps retrying and this returns `Ok`.
    async fn start(
        &self,
        session: &mut Option<Session>,
        entering: ConnectionState,
    ) -> std::result::Result<(), TransportError> {
        self.stop(session).await;
        self.shared.release().await;
        self.shared.state.set(entering);

        match self.shared.open().await {
            Ok(transport) => {
                self.shared.state.set(ConnectionState::Connected);
                info!(
                    endpoint = self.shared.label(),
                    local = %transport.local_addr(),
                    peer = ?transport.peer(),
                    "Connected"
                );
                *session = Some(self.spawn(Some(transport)));
                Ok(())
            }
            Err(e) if entering == ConnectionState::Reconnecting && self.shared.config.auto_reconnect => {
                debug!(endpoint = self.shared.label(), error = %e, "Reopen failed; retrying in background");
                *session = Some(self.spawn(None));
                Ok(())
            }
            Err(e) => {
                self.shared.state.set(ConnectionState::Disconnected);
                warn!(endpoint = self.shared.label(), error = %e, "Failed to open transport");
                Err(e)
            }
        }
    }

    fn spawn(&self, transport: Option<Arc<UdpTransport>>) -> Session {
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(run_session(
            Arc::clone(&self.shared),
            transport,
            cancel.clone(),
        ));
        Session { cancel, task }
    }

    async fn stop(&self, session: &mut Option<Session>) {
        if let Some(Session { cancel, task }) = session.take() {
            cancel.cancel();
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(endpoint = self.shared.label(), "Session task panicked");
                }
            }
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.shared.role)
            .field("state", &self.state())
            .field("handlers", &self.shared.handlers)
            .finish()
    }
}
