//! oscb Bridge - auto-reconnecting OSC client/server over UDP
//!
//! This crate provides the runtime half of the bridge:
//! - `config` - Connection settings and reconnect policy (TOML loadable)
//! - `transport` - UDP socket wrapper with close-wakes-receive semantics
//! - `registry` - Address-pattern handler dispatch
//! - `server` / `client` - The two endpoint roles
//! - `lifecycle` - Host lifecycle events and fan-out
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       host process                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐   OSC/UDP   ┌─────────────────────┐    │
//! │  │     Client      │────────────▶│       Server        │    │
//! │  │ (ephemeral port)│◀────────────│  (host:port_in)     │    │
//! │  └────────┬────────┘   replies   └──────────┬──────────┘    │
//! │           │                                 │ dispatch      │
//! │           │                                 ▼               │
//! │           │                      ┌─────────────────────┐    │
//! │           │                      │  HandlerRegistry    │    │
//! │           │                      └─────────────────────┘    │
//! │           │  liveset_new / loaded / saved / closed          │
//! │  ┌────────┴─────────────────────────────────────────────┐   │
//! │  │              LifecycleController                     │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Transport faults drive reconnection instead of propagating
//! - Handler panics are caught and logged

pub mod client;
pub mod config;
mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod server;
pub mod state;
pub mod transport;

pub use client::Client;
pub use config::{ConnectionConfig, Protocol, ReconnectPolicy};
pub use error::{BridgeError, ConfigError, Result, TransportError};
pub use lifecycle::{Lifecycle, LifecycleAction, LifecycleController, LifecycleEvent};
pub use registry::HandlerRegistry;
pub use server::Server;
pub use state::ConnectionState;

pub use oscb_protocol::{atoms, Atom, Message, Packet};
