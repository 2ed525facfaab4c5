//! Tunnel configuration: the on-disk JSON model, validation and loading.
//!
//! The same file is valid for the host and the peer process; each role only
//! reads the fields relevant to its side.

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_HALF_CLOSE_TIMEOUT_MS,
    DEFAULT_LIVENESS_WINDOW_MS, DEFAULT_PROBE_INITIAL_INTERVAL_MS, DEFAULT_PROBE_JITTER,
    DEFAULT_PROBE_MAX_INTERVAL_MS, DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_SHUTDOWN_GRACE_MS,
};
use crate::error::{Result, TunnelError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Which side of the tunnel a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Runs on the hypervisor host, relays to upstream servers.
    Host,
    /// Runs inside the guest, accepts client connections.
    Peer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Peer => "peer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured route between a guest port and a host upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfig {
    /// Name used in logs and metrics
    pub name: String,
    /// Transport port reserved for liveness probes
    pub handshake_port: u32,
    /// Transport port the host listens on for peer data connections
    pub vsock_host_port: u32,
    /// Guest address the peer listens on for clients
    pub peer_address: String,
    /// Guest TCP port the peer listens on for clients
    pub peer_port: u16,
    /// Host-side `host:port` the host dials for every relayed connection
    pub upstream_server_address: String,
}

impl TunnelConfig {
    /// Validate a single entry. Errors here fail only this tunnel.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TunnelError::Config("tunnel name is required".into()));
        }
        if self.handshake_port == 0 {
            return Err(self.invalid("handshakePort must be non-zero"));
        }
        if self.vsock_host_port == 0 {
            return Err(self.invalid("vsockHostPort must be non-zero"));
        }
        if self.handshake_port == self.vsock_host_port {
            return Err(self.invalid("handshakePort and vsockHostPort must differ"));
        }
        if self.peer_port == 0 {
            return Err(self.invalid("peerPort must be non-zero"));
        }
        self.peer_ip()?;
        match self.upstream_server_address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
            _ => Err(self.invalid(&format!(
                "upstreamServerAddress '{}' is not host:port",
                self.upstream_server_address
            ))),
        }
    }

    /// Parsed `peerAddress`.
    pub fn peer_ip(&self) -> Result<IpAddr> {
        self.peer_address.parse().map_err(|_| {
            self.invalid(&format!(
                "peerAddress '{}' is not an IP address",
                self.peer_address
            ))
        })
    }

    fn invalid(&self, reason: &str) -> TunnelError {
        TunnelError::Config(format!("tunnel '{}': {reason}", self.name))
    }
}

/// Timing knobs shared by every tunnel of a process.
///
/// Durations are stored in milliseconds so the file stays readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TunnelSettings {
    /// First retry delay after a failed probe
    pub probe_initial_interval_ms: u64,
    /// Cap on the retry delay, also the steady interval while healthy
    pub probe_max_interval_ms: u64,
    /// Deadline for one probe (connect plus acknowledgement)
    pub probe_timeout_ms: u64,
    /// Jitter factor applied to retry delays (0.0 - 1.0)
    pub probe_jitter: f64,
    /// Consecutive probe failures before a serving tunnel degrades
    pub failure_threshold: u32,
    /// How long the responding side waits for a probe before degrading
    pub liveness_window_ms: u64,
    /// Bound on dialing the upstream server or the opposite side
    pub connect_timeout_ms: u64,
    /// How long the second direction may run after the first reached EOF
    pub half_close_timeout_ms: u64,
    /// How long shutdown waits for in-flight connections
    pub shutdown_grace_ms: u64,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            probe_initial_interval_ms: DEFAULT_PROBE_INITIAL_INTERVAL_MS,
            probe_max_interval_ms: DEFAULT_PROBE_MAX_INTERVAL_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            probe_jitter: DEFAULT_PROBE_JITTER,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            liveness_window_ms: DEFAULT_LIVENESS_WINDOW_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            half_close_timeout_ms: DEFAULT_HALF_CLOSE_TIMEOUT_MS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }
}

impl TunnelSettings {
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("probeInitialIntervalMs", self.probe_initial_interval_ms),
            ("probeMaxIntervalMs", self.probe_max_interval_ms),
            ("probeTimeoutMs", self.probe_timeout_ms),
            ("livenessWindowMs", self.liveness_window_ms),
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("halfCloseTimeoutMs", self.half_close_timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(TunnelError::Config(format!("{field} must be non-zero")));
            }
        }
        if !(0.0..1.0).contains(&self.probe_jitter) {
            return Err(TunnelError::Config(format!(
                "probeJitter must be in [0, 1), got {}",
                self.probe_jitter
            )));
        }
        if self.failure_threshold == 0 {
            return Err(TunnelError::Config(
                "failureThreshold must be at least 1".into(),
            ));
        }
        if self.probe_initial_interval_ms > self.probe_max_interval_ms {
            return Err(TunnelError::Config(
                "probeInitialIntervalMs must not exceed probeMaxIntervalMs".into(),
            ));
        }
        // The responder must not give up between two healthy probes.
        if self.liveness_window_ms
            <= self
                .probe_max_interval_ms
                .saturating_add(self.probe_timeout_ms)
        {
            return Err(TunnelError::Config(
                "livenessWindowMs must exceed probeMaxIntervalMs + probeTimeoutMs".into(),
            ));
        }
        Ok(())
    }

    pub fn probe_initial_interval(&self) -> Duration {
        Duration::from_millis(self.probe_initial_interval_ms)
    }

    pub fn probe_max_interval(&self) -> Duration {
        Duration::from_millis(self.probe_max_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn half_close_timeout(&self) -> Duration {
        Duration::from_millis(self.half_close_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VtunnelConfig {
    #[serde(default)]
    pub settings: TunnelSettings,
    pub tunnels: Vec<TunnelConfig>,
}

impl VtunnelConfig {
    /// File-level validation. Per-tunnel problems are left to the supervisor
    /// so one bad entry cannot take its siblings down.
    pub fn validate(&self) -> Result<()> {
        if self.tunnels.is_empty() {
            return Err(TunnelError::Config("no tunnels configured".into()));
        }
        self.settings.validate()
    }

    /// Indexes of entries whose listening port repeats one claimed by an
    /// earlier entry, with a description of the clash.
    pub fn port_conflicts(&self, role: Role) -> Vec<(usize, String)> {
        port_conflicts(&self.tunnels, role)
    }
}

/// See [`VtunnelConfig::port_conflicts`].
pub fn port_conflicts(tunnels: &[TunnelConfig], role: Role) -> Vec<(usize, String)> {
    let mut claimed: HashMap<(&'static str, u32), &str> = HashMap::new();
    let mut conflicts = Vec::new();

    for (idx, tunnel) in tunnels.iter().enumerate() {
        let ports: Vec<(&'static str, u32)> = match role {
            Role::Host => vec![("vsockHostPort", tunnel.vsock_host_port)],
            Role::Peer => vec![
                ("peerPort", u32::from(tunnel.peer_port)),
                ("handshakePort", tunnel.handshake_port),
            ],
        };

        let clash = ports
            .iter()
            .find_map(|key| claimed.get(key).map(|owner| (*key, *owner)));
        if let Some(((field, port), owner)) = clash {
            conflicts.push((
                idx,
                format!(
                    "tunnel '{}': {field} {port} already used by tunnel '{owner}'",
                    tunnel.name
                ),
            ));
            continue;
        }
        for key in ports {
            claimed.insert(key, tunnel.name.as_str());
        }
    }

    conflicts
}

/// Load configuration from a JSON file
pub fn load_config(path: impl AsRef<Path>) -> Result<VtunnelConfig> {
    let path = path.as_ref();
    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(TunnelError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let config: VtunnelConfig = serde_json::from_str(&contents)
        .map_err(|e| TunnelError::Parse(format!("{e} in {}", path.display())))?;
    config.validate()?;

    info!(
        "Configuration loaded: {} tunnel(s) from {}",
        config.tunnels.len(),
        path.display()
    );
    Ok(config)
}

/// Load configuration from a JSON string
pub fn load_config_str(json: &str) -> Result<VtunnelConfig> {
    let config: VtunnelConfig =
        serde_json::from_str(json).map_err(|e| TunnelError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
