//! Prometheus metrics for tunnel instances.
//!
//! Nothing is recorded until [`init_metrics`] has been called, so library
//! users who do not scrape metrics pay only for an atomic load.

use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;
use vtunnel_common::Role;

static METRICS: OnceLock<TunnelMetrics> = OnceLock::new();

/// How a relayed connection ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// Dialed and pumped to completion
    Relayed,
    /// Closed on accept because the tunnel was not serving
    Rejected,
    /// The outbound dial failed or timed out
    DialFailed,
    /// The pump ended on an I/O error
    Errored,
}

impl ConnectionOutcome {
    fn as_str(self) -> &'static str {
        match self {
            ConnectionOutcome::Relayed => "relayed",
            ConnectionOutcome::Rejected => "rejected",
            ConnectionOutcome::DialFailed => "dial_failed",
            ConnectionOutcome::Errored => "errored",
        }
    }
}

pub struct TunnelMetrics {
    registry: Registry,
    connections: IntCounterVec,
    bytes: IntCounterVec,
    probes: IntCounterVec,
    state: IntGaugeVec,
}

impl TunnelMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let connections = IntCounterVec::new(
            Opts::new(
                "vtunnel_connections_total",
                "Connections accepted per tunnel, by outcome",
            ),
            &["tunnel", "role", "outcome"],
        )
        .unwrap();
        let bytes = IntCounterVec::new(
            Opts::new(
                "vtunnel_bytes_relayed_total",
                "Bytes copied through connection pumps",
            ),
            &["tunnel", "role", "direction"],
        )
        .unwrap();
        let probes = IntCounterVec::new(
            Opts::new(
                "vtunnel_handshake_probes_total",
                "Handshake probes sent or answered, by result",
            ),
            &["tunnel", "role", "result"],
        )
        .unwrap();
        let state = IntGaugeVec::new(
            Opts::new(
                "vtunnel_tunnel_state",
                "Current instance state (0=starting 1=handshake_wait 2=serving 3=degraded 4=closed)",
            ),
            &["tunnel", "role"],
        )
        .unwrap();

        registry.register(Box::new(connections.clone())).unwrap();
        registry.register(Box::new(bytes.clone())).unwrap();
        registry.register(Box::new(probes.clone())).unwrap();
        registry.register(Box::new(state.clone())).unwrap();

        Self {
            registry,
            connections,
            bytes,
            probes,
            state,
        }
    }

    pub fn record_connection(&self, tunnel: &str, role: Role, outcome: ConnectionOutcome) {
        self.connections
            .with_label_values(&[tunnel, role.as_str(), outcome.as_str()])
            .inc();
    }

    /// `inbound` counts bytes read from the accepted side, `outbound` from the dialed side.
    pub fn record_bytes(&self, tunnel: &str, role: Role, inbound: u64, outbound: u64) {
        self.bytes
            .with_label_values(&[tunnel, role.as_str(), "inbound"])
            .inc_by(inbound);
        self.bytes
            .with_label_values(&[tunnel, role.as_str(), "outbound"])
            .inc_by(outbound);
    }

    pub fn record_probe(&self, tunnel: &str, role: Role, ok: bool) {
        let result = if ok { "ok" } else { "failed" };
        self.probes
            .with_label_values(&[tunnel, role.as_str(), result])
            .inc();
    }

    pub fn set_state(&self, tunnel: &str, role: Role, ordinal: i64) {
        self.state
            .with_label_values(&[tunnel, role.as_str()])
            .set(ordinal);
    }
}

/// Register the metric families. Idempotent.
pub fn init_metrics() -> &'static TunnelMetrics {
    METRICS.get_or_init(TunnelMetrics::new)
}

pub fn metrics_enabled() -> bool {
    METRICS.get().is_some()
}

/// The registered metrics, if [`init_metrics`] has run.
pub fn tunnel_metrics() -> Option<&'static TunnelMetrics> {
    METRICS.get()
}

/// Render all metrics in the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let Some(metrics) = METRICS.get() else {
        return String::new();
    };
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metrics.registry.gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
