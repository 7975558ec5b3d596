//! oscb - OSC bridge command-line front end
//!
//! Listens for OSC messages or sends one, using the same auto-reconnecting
//! endpoints an embedding host would.
//!
//! # Usage
//!
//! ```text
//! # Print everything arriving on port 7400
//! oscb listen --port 7400
//!
//! # Only /test/m4l, as JSON lines
//! oscb listen --port 7400 --pattern /test/m4l --json
//!
//! # Send a message (typed prefixes: i: f: s: h: d:, or T F N I)
//! oscb send --port 7400 /test/m4l hello i:2 f:0.5 T
//!
//! # Arguments as a JSON array
//! oscb send --port 7400 /test/m4l --json '["hello", 2, 0.5, true, null]'
//!
//! # Enable debug logging
//! RUST_LOG=oscb_bridge=debug oscb listen --port 7400
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Disconnect and exit
//! - SIGHUP: Treated as a host `loaded` event (transport restart)

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oscb_bridge::{Atom, Client, ConnectionConfig, Message, Server};

/// Deepest address the catch-all listener subscribes to.
const CATCH_ALL_DEPTH: usize = 8;

// ============================================================================
// CLI Arguments
// ============================================================================

/// oscb - auto-reconnecting OSC bridge
#[derive(Parser, Debug)]
#[command(name = "oscb", version, about)]
struct Args {
    /// Connection config file (TOML). Defaults to <config dir>/oscb/config.toml
    /// when that file exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive messages and print them
    Listen {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (0 picks a free one)
        #[arg(short, long)]
        port: Option<u16>,

        /// Address pattern to subscribe to; repeatable. Defaults to everything.
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Print one JSON object per message
        #[arg(long)]
        json: bool,
    },
    /// Send a single message
    Send {
        /// Destination host
        #[arg(long)]
        host: Option<String>,

        /// Destination port
        #[arg(short, long)]
        port: Option<u16>,

        /// OSC address, e.g. /test/m4l
        address: String,

        /// Arguments: i:42 f:1.5 s:text h:64bit d:double, T F N I, or inferred
        #[arg(allow_hyphen_values = true, conflicts_with = "json")]
        args: Vec<String>,

        /// Arguments as a JSON array
        #[arg(long)]
        json: Option<String>,
    },
}

// ============================================================================
// Configuration
// ============================================================================

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("oscb").join("config.toml"))
}

/// Loads the explicit config file, else the default one if present, else
/// built-in defaults.
fn load_config(explicit: Option<&Path>) -> Result<ConnectionConfig> {
    if let Some(path) = explicit {
        return ConnectionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()));
    }

    match default_config_path() {
        Some(path) if path.exists() => ConnectionConfig::load(&path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        _ => Ok(ConnectionConfig::default()),
    }
}

// ============================================================================
// Argument Parsing
// ============================================================================

/// Parses one command-line argument into an atom.
fn parse_arg(raw: &str) -> Result<Atom> {
    let atom = match raw {
        "T" => Atom::Bool(true),
        "F" => Atom::Bool(false),
        "N" => Atom::Nil,
        "I" => Atom::Impulse,
        _ => match raw.split_once(':') {
            Some(("i", v)) => Atom::Int(v.parse().with_context(|| format!("Invalid int32 {v:?}"))?),
            Some(("f", v)) => Atom::Float(v.parse().with_context(|| format!("Invalid float32 {v:?}"))?),
            Some(("h", v)) => Atom::Long(v.parse().with_context(|| format!("Invalid int64 {v:?}"))?),
            Some(("d", v)) => Atom::Double(v.parse().with_context(|| format!("Invalid float64 {v:?}"))?),
            Some(("s", v)) => Atom::String(v.to_string()),
            _ => infer_arg(raw),
        },
    };
    Ok(atom)
}

fn infer_arg(raw: &str) -> Atom {
    if let Ok(v) = raw.parse::<i32>() {
        return Atom::Int(v);
    }
    if raw.contains(['.', 'e', 'E']) {
        if let Ok(v) = raw.parse::<f32>() {
            if v.is_finite() {
                return Atom::Float(v);
            }
        }
    }
    Atom::String(raw.to_string())
}

/// Converts a JSON array into atoms.
fn json_args(text: &str) -> Result<Vec<Atom>> {
    let value: Value = serde_json::from_str(text).context("Invalid JSON arguments")?;
    let Value::Array(items) = value else {
        bail!("JSON arguments must be an array");
    };
    items.iter().map(json_atom).collect()
}

fn json_atom(value: &Value) -> Result<Atom> {
    let atom = match value {
        Value::Null => Atom::Nil,
        Value::Bool(b) => Atom::Bool(*b),
        Value::String(s) => Atom::String(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).map(Atom::Int).unwrap_or(Atom::Long(i))
            } else if let Some(f) = n.as_f64() {
                Atom::Float(f as f32)
            } else {
                bail!("Unsupported number {n}");
            }
        }
        Value::Array(_) | Value::Object(_) => bail!("Nested JSON values are not supported: {value}"),
    };
    Ok(atom)
}

/// One pattern per depth, since wildcards never cross '/'.
fn catch_all_patterns() -> Vec<String> {
    (1..=CATCH_ALL_DEPTH).map(|depth| "/*".repeat(depth)).collect()
}

fn format_message(address: &str, args: &[Atom], json: bool) -> String {
    if json {
        let message = Message::new(address, args.to_vec());
        return serde_json::to_string(&message).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize message");
            String::new()
        });
    }

    let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
    if rendered.is_empty() {
        address.to_string()
    } else {
        format!("{address} {}", rendered.join(" "))
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run_listen(
    mut config: ConnectionConfig,
    host: Option<String>,
    port: Option<u16>,
    patterns: Vec<String>,
    json: bool,
) -> Result<()> {
    if let Some(host) = host {
        config.host = host;
    }
    if port.is_some() {
        config.port_in = port;
    }

    let server = Server::new(config).context("Invalid listen configuration")?;

    let patterns = if patterns.is_empty() {
        catch_all_patterns()
    } else {
        patterns
    };
    for pattern in &patterns {
        server
            .register_handler(pattern, move |address, args| {
                let line = format_message(address, args, json);
                if !line.is_empty() {
                    println!("{line}");
                }
            })
            .with_context(|| format!("Invalid pattern {pattern:?}"))?;
    }

    server.connect().await.context("Failed to start listening")?;
    if let Some(addr) = server.local_addr().await {
        info!(addr = %addr, patterns = patterns.len(), "Listening");
    }

    wait_for_signals(&server).await?;

    server.disconnect().await;
    info!("Stopped");
    Ok(())
}

async fn run_send(
    mut config: ConnectionConfig,
    host: Option<String>,
    port: Option<u16>,
    address: String,
    args: Vec<String>,
    json: Option<String>,
) -> Result<()> {
    if let Some(host) = host {
        config.host = host;
    }
    if port.is_some() {
        config.port_out = port;
    }

    let atoms = match json {
        Some(text) => json_args(&text)?,
        None => args.iter().map(|raw| parse_arg(raw)).collect::<Result<Vec<_>>>()?,
    };

    let client = Client::new(config).context("Invalid send configuration")?;
    client.connect().await.context("Failed to open socket")?;

    let sent = client.send(&address, &atoms).await;
    client.disconnect().await;

    if !sent {
        bail!("Failed to send {address}");
    }
    info!(address = %address, args = atoms.len(), "Sent");
    Ok(())
}

/// Runs until SIGTERM/SIGINT; SIGHUP restarts the transport.
async fn wait_for_signals(server: &Server) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP; restarting transport");
                    server.handle_lifecycle_event("loaded").await;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = server;
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries received messages; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("oscb=info".parse()?)
                .add_directive("oscb_bridge=info".parse()?)
                .add_directive("oscb_protocol=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Listen {
            host,
            port,
            patterns,
            json,
        } => run_listen(config, host, port, patterns, json).await,
        Command::Send {
            host,
            port,
            address,
            args,
            json,
        } => run_send(config, host, port, address, args, json).await,
    }
}
