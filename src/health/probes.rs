//! Probe kinds and their registry.
//!
//! # Responsibilities
//! - Define the common probing interface
//! - Map probe type names to constructors
//! - Provide the built-in `ping`, `tcp` and `command` kinds
//!
//! # Design Decisions
//! - A probe answers only "reachable or not"; failures are never errors
//! - Constructors validate their parameters, so a bad `config` table is
//!   caught at load time by building a throwaway probe
//! - Timeouts are enforced by the caller, not by each probe

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;

/// Placeholder substituted with the destination IP in command arguments.
pub const DESTINATION_PLACEHOLDER: &str = "%DESTINATION%";

/// Errors raised while constructing a probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("'{param}' not defined in {kind} healthcheck config to {destination}")]
    MissingParam {
        kind: &'static str,
        param: &'static str,
        destination: IpAddr,
    },

    #[error("'{param}' in {kind} healthcheck config is invalid: {reason}")]
    InvalidParam {
        kind: &'static str,
        param: &'static str,
        reason: String,
    },
}

/// A single reachability check against one destination.
#[async_trait]
pub trait Prober: Send + Sync + fmt::Debug {
    /// Returns true if the destination looks healthy.
    async fn probe(&self) -> bool;
}

/// Constructor signature stored in the registry.
pub type ProbeConstructor =
    Arc<dyn Fn(IpAddr, &toml::Table) -> Result<Box<dyn Prober>, ProbeError> + Send + Sync>;

/// Named probe constructors.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    kinds: HashMap<String, ProbeConstructor>,
}

impl fmt::Debug for ProbeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&String> = self.kinds.keys().collect();
        kinds.sort();
        f.debug_struct("ProbeRegistry").field("kinds", &kinds).finish()
    }
}

impl ProbeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("ping", |ip, _| Ok(Box::new(PingProbe::new(ip))));
        registry.register("tcp", |ip, cfg| Ok(Box::new(TcpProbe::from_config(ip, cfg)?)));
        registry.register("command", |ip, cfg| {
            Ok(Box::new(CommandProbe::from_config(ip, cfg)?))
        });
        registry
    }

    /// Register (or replace) a kind.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(IpAddr, &toml::Table) -> Result<Box<dyn Prober>, ProbeError> + Send + Sync + 'static,
    {
        self.kinds.insert(name.into(), Arc::new(constructor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Build a probe. `None` means the kind is not registered.
    pub fn build(
        &self,
        name: &str,
        destination: IpAddr,
        config: &toml::Table,
    ) -> Option<Result<Box<dyn Prober>, ProbeError>> {
        self.kinds.get(name).map(|ctor| ctor(destination, config))
    }
}

/// One ICMP echo through the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingProbe {
    destination: IpAddr,
}

impl PingProbe {
    pub fn new(destination: IpAddr) -> Self {
        Self { destination }
    }
}

#[async_trait]
impl Prober for PingProbe {
    async fn probe(&self) -> bool {
        let status = Command::new("ping")
            .args(["-c", "1", "-W", "1"])
            .arg(self.destination.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(s) => s.success(),
            Err(e) => {
                tracing::warn!(destination = %self.destination, error = %e, "Failed to run ping");
                false
            }
        }
    }
}

/// TCP connect, with an optional payload and expected reply substring.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: SocketAddr,
    send: Option<String>,
    expect: Option<String>,
}

impl TcpProbe {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            send: None,
            expect: None,
        }
    }

    pub fn from_config(destination: IpAddr, config: &toml::Table) -> Result<Self, ProbeError> {
        let port = match config.get("port") {
            Some(toml::Value::Integer(p)) => u16::try_from(*p).ok(),
            Some(toml::Value::String(s)) => s.parse::<u16>().ok(),
            Some(_) => None,
            None => {
                return Err(ProbeError::MissingParam {
                    kind: "tcp",
                    param: "port",
                    destination,
                })
            }
        }
        .ok_or_else(|| ProbeError::InvalidParam {
            kind: "tcp",
            param: "port",
            reason: "must be a port number".to_string(),
        })?;

        Ok(Self {
            addr: SocketAddr::new(destination, port),
            send: string_param(config, "tcp", "send")?,
            expect: string_param(config, "tcp", "expect")?,
        })
    }
}

#[async_trait]
impl Prober for TcpProbe {
    async fn probe(&self) -> bool {
        let mut stream = match TcpStream::connect(self.addr).await {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(addr = %self.addr, error = %e, "TCP probe connect failed");
                return false;
            }
        };

        if let Some(payload) = &self.send {
            if let Err(e) = stream.write_all(payload.as_bytes()).await {
                tracing::debug!(addr = %self.addr, error = %e, "TCP probe send failed");
                return false;
            }
        }

        let Some(expect) = &self.expect else {
            return true;
        };

        let mut buf = [0u8; 1024];
        match stream.read(&mut buf).await {
            Ok(n) => String::from_utf8_lossy(&buf[..n]).contains(expect.as_str()),
            Err(e) => {
                tracing::debug!(addr = %self.addr, error = %e, "TCP probe read failed");
                false
            }
        }
    }
}

/// Runs an external command; exit status 0 is healthy.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    destination: IpAddr,
    command: String,
    arguments: Vec<String>,
}

impl CommandProbe {
    pub fn from_config(destination: IpAddr, config: &toml::Table) -> Result<Self, ProbeError> {
        let command = string_param(config, "command", "command")?.ok_or(
            ProbeError::MissingParam {
                kind: "command",
                param: "command",
                destination,
            },
        )?;

        let dest = destination.to_string();
        let arguments = match config.get("arguments") {
            None => Vec::new(),
            Some(toml::Value::Array(items)) => items
                .iter()
                .map(|v| match v {
                    toml::Value::String(s) => s.replace(DESTINATION_PLACEHOLDER, &dest),
                    other => other.to_string(),
                })
                .collect(),
            Some(_) => {
                return Err(ProbeError::InvalidParam {
                    kind: "command",
                    param: "arguments",
                    reason: "must be an array".to_string(),
                })
            }
        };

        Ok(Self {
            destination,
            command,
            arguments,
        })
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }
}

#[async_trait]
impl Prober for CommandProbe {
    async fn probe(&self) -> bool {
        let status = Command::new(&self.command)
            .args(&self.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(s) if s.success() => true,
            Ok(s) => {
                tracing::debug!(
                    destination = %self.destination,
                    command = %self.command,
                    status = %s,
                    "Command healthcheck failed"
                );
                false
            }
            Err(e) => {
                tracing::warn!(command = %self.command, error = %e, "Failed to spawn healthcheck command");
                false
            }
        }
    }
}

fn string_param(
    config: &toml::Table,
    kind: &'static str,
    param: &'static str,
) -> Result<Option<String>, ProbeError> {
    match config.get(param) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ProbeError::InvalidParam {
            kind,
            param,
            reason: "must be a string".to_string(),
        }),
    }
}
