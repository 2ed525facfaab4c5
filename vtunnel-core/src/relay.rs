//! Accept loop shared by both roles.
//!
//! Every accepted connection is checked against the instance state: only a
//! `Serving` instance dials its target and pumps bytes, anything else closes
//! the connection immediately.

use crate::pump::{pump, PumpConfig, PumpOutcome, PumpStats};
use crate::state::StateHandle;
use crate::transport::{self, tcp, BoxedStream, TransportConfig, TransportListener};
use std::fmt;
use std::io;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vtunnel_common::TunnelSettings;

#[cfg(feature = "metrics")]
use vtunnel_observability::ConnectionOutcome;

/// Delay before accepting again after a failed accept.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Where accepted connections are forwarded.
#[derive(Debug, Clone)]
pub enum DialTarget {
    /// Plain TCP `host:port`: the upstream server on the host side.
    Tcp(String),
    /// The opposite side of the tunnel over the transport.
    Transport { config: TransportConfig, port: u32 },
}

impl DialTarget {
    pub async fn dial(&self) -> io::Result<BoxedStream> {
        match self {
            DialTarget::Tcp(addr) => tcp::connect(addr).await,
            DialTarget::Transport { config, port } => transport::connect(config, *port).await,
        }
    }
}

impl fmt::Display for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialTarget::Tcp(addr) => write!(f, "tcp://{addr}"),
            DialTarget::Transport { config, port } => f.write_str(&config.describe_remote(*port)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    pub shutdown_grace: Duration,
    pub pump: PumpConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&TunnelSettings::default())
    }
}

impl From<&TunnelSettings> for RelayConfig {
    fn from(settings: &TunnelSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            shutdown_grace: settings.shutdown_grace(),
            pump: PumpConfig {
                half_close_timeout: settings.half_close_timeout(),
                ..PumpConfig::default()
            },
        }
    }
}

/// One listener forwarding to one target.
#[derive(Debug)]
pub struct RelayServer {
    state: StateHandle,
    listener: TransportListener,
    target: DialTarget,
    config: RelayConfig,
}

impl RelayServer {
    pub fn new(
        state: StateHandle,
        listener: TransportListener,
        target: DialTarget,
        config: RelayConfig,
    ) -> Self {
        Self {
            state,
            listener,
            target,
            config,
        }
    }

    pub fn local_description(&self) -> String {
        self.listener.local_description()
    }

    /// Accept until `cancel` fires, then drain in-flight connections.
    ///
    /// The listener is closed as soon as the loop exits. Connections still
    /// running after `shutdown_grace` are aborted.
    pub async fn run(self, cancel: CancellationToken) {
        let RelayServer {
            state,
            mut listener,
            target,
            config,
        } = self;

        info!(
            tunnel = %state.name(),
            role = %state.role(),
            listen = %listener.local_description(),
            target = %target,
            "Relay listening"
        );

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, from)) => {
                        if !state.admits_traffic() {
                            debug!(
                                tunnel = %state.name(),
                                from = %from,
                                state = %state.current(),
                                "Rejecting connection, tunnel not serving"
                            );
                            record_connection(&state, ConnOutcome::Rejected);
                            drop(stream);
                            continue;
                        }
                        let state = state.clone();
                        let target = target.clone();
                        let config = config.clone();
                        let cancel = cancel.clone();
                        connections.spawn(async move {
                            handle_connection(stream, from, &state, &target, &config, &cancel).await;
                        });
                    }
                    Err(e) => {
                        warn!(tunnel = %state.name(), error = %e, "Accept error");
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(ACCEPT_RETRY_DELAY) => {}
                        }
                    }
                },
            }
        }

        drop(listener);

        if connections.is_empty() {
            return;
        }
        debug!(
            tunnel = %state.name(),
            in_flight = connections.len(),
            "Waiting for connections to close"
        );
        let drained = tokio::time::timeout(config.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                tunnel = %state.name(),
                remaining = connections.len(),
                "Shutdown grace expired, aborting connections"
            );
            connections.abort_all();
            while connections.join_next().await.is_some() {}
        }
    }
}

async fn handle_connection(
    inbound: BoxedStream,
    from: String,
    state: &StateHandle,
    target: &DialTarget,
    config: &RelayConfig,
    cancel: &CancellationToken,
) {
    let dialed = tokio::select! {
        () = cancel.cancelled() => return,
        r = tokio::time::timeout(config.connect_timeout, target.dial()) => r,
    };
    let outbound = match dialed {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!(
                tunnel = %state.name(),
                from = %from,
                target = %target,
                error = %e,
                "Dial failed, closing connection"
            );
            record_connection(state, ConnOutcome::DialFailed);
            return;
        }
        Err(_) => {
            warn!(
                tunnel = %state.name(),
                from = %from,
                target = %target,
                timeout_ms = config.connect_timeout.as_millis(),
                "Dial timed out, closing connection"
            );
            record_connection(state, ConnOutcome::DialFailed);
            return;
        }
    };

    let stats = pump(inbound, outbound, &config.pump, cancel).await;
    log_closed(state, &from, &stats);
    record_bytes(state, &stats);
    record_connection(
        state,
        match stats.outcome {
            PumpOutcome::Errored(_) => ConnOutcome::Errored,
            _ => ConnOutcome::Relayed,
        },
    );
}

fn log_closed(state: &StateHandle, from: &str, stats: &PumpStats) {
    let bytes_in = stats.a_to_b;
    let bytes_out = stats.b_to_a;
    let duration_ms = stats.duration.as_millis();
    match &stats.outcome {
        PumpOutcome::Completed => info!(
            tunnel = %state.name(),
            from = %from,
            bytes_in,
            bytes_out,
            duration_ms,
            "Connection closed"
        ),
        PumpOutcome::HalfCloseTimeout => info!(
            tunnel = %state.name(),
            from = %from,
            bytes_in,
            bytes_out,
            duration_ms,
            "Connection closed after half-close timeout"
        ),
        PumpOutcome::Errored(e) => debug!(
            tunnel = %state.name(),
            from = %from,
            bytes_in,
            bytes_out,
            duration_ms,
            error = %e,
            "Connection closed with error"
        ),
        PumpOutcome::Cancelled => debug!(
            tunnel = %state.name(),
            from = %from,
            bytes_in,
            bytes_out,
            "Connection closed by shutdown"
        ),
    }
}

#[derive(Debug, Clone, Copy)]
enum ConnOutcome {
    Relayed,
    Rejected,
    DialFailed,
    Errored,
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
fn record_connection(state: &StateHandle, outcome: ConnOutcome) {
    #[cfg(feature = "metrics")]
    if let Some(m) = vtunnel_observability::tunnel_metrics() {
        let outcome = match outcome {
            ConnOutcome::Relayed => ConnectionOutcome::Relayed,
            ConnOutcome::Rejected => ConnectionOutcome::Rejected,
            ConnOutcome::DialFailed => ConnectionOutcome::DialFailed,
            ConnOutcome::Errored => ConnectionOutcome::Errored,
        };
        m.record_connection(state.name(), state.role(), outcome);
    }
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
fn record_bytes(state: &StateHandle, stats: &PumpStats) {
    #[cfg(feature = "metrics")]
    if let Some(m) = vtunnel_observability::tunnel_metrics() {
        m.record_bytes(state.name(), state.role(), stats.a_to_b, stats.b_to_a);
    }
}
