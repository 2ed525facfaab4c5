//! Host half of a tunnel.
//!
//! Listens on the transport at `vsockHostPort`, relays accepted streams to
//! the upstream server over TCP, and probes the peer's handshake port.

use crate::handshake::Prober;
use crate::instance::{Liveness, TunnelInstance};
use crate::relay::{DialTarget, RelayConfig, RelayServer};
use crate::state::StateHandle;
use crate::transport::{self, TransportConfig};
use tracing::debug;
use vtunnel_common::{Result, Role, TunnelConfig, TunnelError, TunnelSettings};

/// Bind the host listener for `tunnel`.
///
/// Nothing runs until [`TunnelInstance::start`]. A bind failure is returned
/// here so it can be reported against this tunnel alone.
pub async fn bind(
    tunnel: &TunnelConfig,
    transport: &TransportConfig,
    settings: &TunnelSettings,
) -> Result<TunnelInstance> {
    tunnel.validate()?;

    let state = StateHandle::new(&tunnel.name, Role::Host);
    let listener = transport::bind(transport, tunnel.vsock_host_port)
        .await
        .map_err(|e| {
            TunnelError::bind(format!("host data port {}", tunnel.vsock_host_port), e)
        })?;
    debug!(
        tunnel = %tunnel.name,
        listen = %listener.local_description(),
        upstream = %tunnel.upstream_server_address,
        "Host listener bound"
    );

    let relay = RelayServer::new(
        state.clone(),
        listener,
        DialTarget::Tcp(tunnel.upstream_server_address.clone()),
        RelayConfig::from(settings),
    );
    let prober = Prober::new(state.clone(), *transport, tunnel.handshake_port, settings);

    Ok(TunnelInstance::new(state, relay, Liveness::Prober(prober)))
}
