//! Host lifecycle events.
//!
//! Audio hosts tear down and rebuild their document state on project
//! new/load/close, which can invalidate sockets opened by plugins. The host
//! reports these transitions by name; [`LifecycleEvent::parse`] maps the
//! name to an event and [`LifecycleEvent::action`] says what an endpoint
//! should do about it.
//!
//! | Event    | Action  |
//! |----------|---------|
//! | `New`    | Restart |
//! | `Loaded` | Restart |
//! | `Closed` | Restart |
//! | `Saved`  | Verify  |
//! | `Other`  | Ignore  |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

/// A lifecycle transition reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    New,
    Loaded,
    Saved,
    Closed,
    /// Any name not recognised above.
    Other(String),
}

/// What an endpoint does in response to a [`LifecycleEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// Close and reopen the transport.
    Restart,
    /// Reopen only if the endpoint is not currently connected.
    Verify,
    Ignore,
}

impl LifecycleEvent {
    /// Parses a host event name. Never fails.
    ///
    /// Accepts bare names (`loaded`) and host-prefixed ones (`liveset_loaded`,
    /// `project-loaded`), case-insensitively.
    pub fn parse(name: &str) -> Self {
        let lowered = name.trim().to_ascii_lowercase();
        let stem = ["liveset_", "liveset-", "project_", "project-", "set_", "set-"]
            .iter()
            .find_map(|prefix| lowered.strip_prefix(*prefix))
            .unwrap_or(lowered.as_str());

        match stem {
            "new" | "created" => LifecycleEvent::New,
            "loaded" | "load" | "opened" | "open" => LifecycleEvent::Loaded,
            "saved" | "save" => LifecycleEvent::Saved,
            "closed" | "close" => LifecycleEvent::Closed,
            _ => LifecycleEvent::Other(name.to_string()),
        }
    }

    pub fn action(&self) -> LifecycleAction {
        match self {
            LifecycleEvent::New | LifecycleEvent::Loaded | LifecycleEvent::Closed => {
                LifecycleAction::Restart
            }
            LifecycleEvent::Saved => LifecycleAction::Verify,
            LifecycleEvent::Other(_) => LifecycleAction::Ignore,
        }
    }
}

impl From<&str> for LifecycleEvent {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::New => f.write_str("new"),
            LifecycleEvent::Loaded => f.write_str("loaded"),
            LifecycleEvent::Saved => f.write_str("saved"),
            LifecycleEvent::Closed => f.write_str("closed"),
            LifecycleEvent::Other(name) => write!(f, "other({name})"),
        }
    }
}

/// Anything that reacts to host lifecycle events.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Applies `event`. Must not fail and must be safe in any state.
    async fn on_lifecycle_event(&self, event: &LifecycleEvent);
}

/// Fans one host event out to every registered endpoint, in order.
///
/// ```rust,no_run
/// # async fn demo() -> oscb_bridge::Result<()> {
/// use std::sync::Arc;
/// use oscb_bridge::{Client, ConnectionConfig, LifecycleController, Server};
///
/// let server = Arc::new(Server::new(ConnectionConfig::server("localhost", 7400))?);
/// let client = Arc::new(Client::new(ConnectionConfig::client("localhost", 7401))?);
///
/// let mut controller = LifecycleController::new();
/// controller.attach(server.clone());
/// controller.attach(client.clone());
///
/// controller.dispatch("liveset_loaded").await;
/// # Ok(())
/// # }
/// ```
#[derive(Default, Clone)]
pub struct LifecycleController {
    targets: Vec<Arc<dyn Lifecycle>>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, target: Arc<dyn Lifecycle>) {
        self.targets.push(target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Parses `name` and delivers the event to every target.
    pub async fn dispatch(&self, name: &str) -> LifecycleEvent {
        let event = LifecycleEvent::parse(name);
        self.dispatch_event(&event).await;
        event
    }

    pub async fn dispatch_event(&self, event: &LifecycleEvent) {
        debug!(%event, targets = self.targets.len(), "Dispatching lifecycle event");
        for target in &self.targets {
            target.on_lifecycle_event(event).await;
        }
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("targets", &self.targets.len())
            .finish()
    }
}
