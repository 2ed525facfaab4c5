//! Peer half of a tunnel.
//!
//! Listens for clients on `peerAddress:peerPort`, answers the host's probes
//! on `handshakePort`, and relays client streams to the host's data port over
//! the transport.

use crate::handshake::Responder;
use crate::instance::{Liveness, TunnelInstance};
use crate::relay::{DialTarget, RelayConfig, RelayServer};
use crate::state::StateHandle;
use crate::transport::{self, tcp, TransportConfig, TransportListener};
use std::net::SocketAddr;
use tracing::debug;
use vtunnel_common::{Result, Role, TunnelConfig, TunnelError, TunnelSettings};

/// Bind the client listener and the handshake listener for `tunnel`.
pub async fn bind(
    tunnel: &TunnelConfig,
    transport: &TransportConfig,
    settings: &TunnelSettings,
) -> Result<TunnelInstance> {
    tunnel.validate()?;

    let client_addr = SocketAddr::new(tunnel.peer_ip()?, tunnel.peer_port);
    let client_listener = tcp::bind(client_addr)
        .await
        .map_err(|e| TunnelError::bind(format!("peer listener {client_addr}"), e))?;
    let handshake_listener = transport::bind(transport, tunnel.handshake_port)
        .await
        .map_err(|e| {
            TunnelError::bind(format!("handshake port {}", tunnel.handshake_port), e)
        })?;
    debug!(
        tunnel = %tunnel.name,
        listen = %client_addr,
        handshake = %handshake_listener.local_description(),
        "Peer listeners bound"
    );

    let state = StateHandle::new(&tunnel.name, Role::Peer);
    let relay = RelayServer::new(
        state.clone(),
        TransportListener::tcp(client_listener),
        DialTarget::Transport {
            config: *transport,
            port: tunnel.vsock_host_port,
        },
        RelayConfig::from(settings),
    );
    let responder = Responder::new(state.clone(), handshake_listener, settings);

    Ok(TunnelInstance::new(state, relay, Liveness::Responder(responder)))
}
