//! Connection configuration.
//!
//! A [`ConnectionConfig`] is built once (in code or from TOML) and handed to
//! a `Server` or `Client`, which validate it for their role.
//!
//! ```toml
//! host = "localhost"
//! port_in = 7400
//! port_out = 7401
//! auto_reconnect = true
//! send_wait_ms = 50
//!
//! [reconnect]
//! initial_delay_ms = 50
//! max_delay_ms = 2000
//! multiplier = 2.0
//! max_attempts = 40
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default host for both roles.
pub const DEFAULT_HOST: &str = "localhost";

/// Datagram transport used by the bridge. Only UDP is implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Udp,
}

// ============================================================================
// Reconnect Policy
// ============================================================================

/// Exponential backoff used while an endpoint is reconnecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the second attempt (the first is immediate).
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,

    /// Upper bound for the delay between attempts.
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,

    /// Give up after this many failed attempts. `None` retries until
    /// `disconnect()` is called.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Returns the delay that follows `current`, capped at `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }

    /// Returns true once `attempts` failures exhaust the policy.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::InvalidPolicy(
                "initial_delay must be greater than 0".to_string(),
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::InvalidPolicy(
                "max_delay must not be less than initial_delay".to_string(),
            ));
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidPolicy(format!(
                "multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Connection Config
// ============================================================================

/// Settings shared by `Server` and `Client`.
///
/// # Example
///
/// ```rust
/// use oscb_bridge::config::ConnectionConfig;
///
/// let server = ConnectionConfig::server("localhost", 7400);
/// let client = ConnectionConfig::client("localhost", 7400).with_auto_reconnect(false);
/// assert_eq!(server.port_in, Some(7400));
/// assert_eq!(client.port_out, Some(7400));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Host to bind (server) or send to (client).
    pub host: String,

    /// Port the server listens on. `0` asks the OS for a free port, which is
    /// kept across reconnects.
    pub port_in: Option<u16>,

    /// Port the client sends to. On a server, a fixed reply port; without
    /// it the server replies to whoever sent last.
    pub port_out: Option<u16>,

    /// Reopen the transport after a fault instead of going Disconnected.
    pub auto_reconnect: bool,

    pub protocol: Protocol,

    /// How long `send()` waits for an in-flight reconnect before giving up.
    #[serde(rename = "send_wait_ms", with = "millis")]
    pub send_wait: Duration,

    // Last so it serializes as a trailing TOML table.
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port_in: None,
            port_out: None,
            auto_reconnect: true,
            protocol: Protocol::Udp,
            send_wait: Duration::from_millis(50),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    /// Config for a server listening on `host:port_in`.
    pub fn server(host: impl Into<String>, port_in: u16) -> Self {
        Self {
            host: host.into(),
            port_in: Some(port_in),
            ..Default::default()
        }
    }

    /// Config for a client sending to `host:port_out`.
    pub fn client(host: impl Into<String>, port_out: u16) -> Self {
        Self {
            host: host.into(),
            port_out: Some(port_out),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    #[must_use]
    pub fn with_port_out(mut self, port_out: u16) -> Self {
        self.port_out = Some(port_out);
        self
    }

    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub fn with_send_wait(mut self, send_wait: Duration) -> Self {
        self.send_wait = send_wait;
        self
    }

    /// Parses a TOML document; missing fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Checks the fields a server needs.
    pub fn validate_server(&self) -> Result<(), ConfigError> {
        self.validate_common()?;
        if self.port_in.is_none() {
            return Err(ConfigError::MissingPort {
                role: "Server",
                field: "port_in",
            });
        }
        Ok(())
    }

    /// Checks the fields a client needs.
    pub fn validate_client(&self) -> Result<(), ConfigError> {
        self.validate_common()?;
        match self.port_out {
            None => Err(ConfigError::MissingPort {
                role: "Client",
                field: "port_out",
            }),
            Some(0) => Err(ConfigError::ZeroPeerPort),
            Some(_) => Ok(()),
        }
    }

    fn validate_common(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        self.reconnect.validate()
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
