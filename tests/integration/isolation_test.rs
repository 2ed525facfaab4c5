use super::{
    echo_round_trip, fast_settings, peer_addr, start_echo_server, start_supervisor,
    tunnel_config, wait_for_state,
};
use vtunnel_common::{Role, TunnelError};
use vtunnel_core::{InstanceState, Supervisor, TransportConfig};

#[tokio::test]
async fn test_duplicate_host_port_fails_only_that_tunnel() {
    let upstream = start_echo_server().await;
    let good = tunnel_config("good", upstream.addr);
    let mut clash = tunnel_config("clash", upstream.addr);
    clash.vsock_host_port = good.vsock_host_port;
    let tunnels = vec![good.clone(), clash];

    let mut peer = start_supervisor(Role::Peer, &tunnels).await;
    let mut host = start_supervisor(Role::Host, &tunnels).await;

    assert_eq!(host.failures().len(), 1);
    assert_eq!(host.failures()[0].name, "clash");
    assert!(host.failures()[0].error.is_config());

    wait_for_state(&host, "good", InstanceState::Serving).await;
    wait_for_state(&peer, "good", InstanceState::Serving).await;
    assert_eq!(echo_round_trip(peer_addr(&good), b"ping").await, b"ping");

    host.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_invalid_entry_fails_only_that_tunnel() {
    let upstream = start_echo_server().await;
    let good = tunnel_config("good", upstream.addr);
    let mut broken = tunnel_config("broken", upstream.addr);
    broken.peer_address = "not-an-ip".to_string();
    let tunnels = vec![broken, good.clone()];

    let mut peer = start_supervisor(Role::Peer, &tunnels).await;
    let mut host = start_supervisor(Role::Host, &tunnels).await;

    assert_eq!(peer.failures().len(), 1);
    assert_eq!(peer.failures()[0].name, "broken");
    assert!(matches!(peer.failures()[0].error, TunnelError::Config(_)));
    assert_eq!(peer.state_of("broken"), None);

    wait_for_state(&host, "good", InstanceState::Serving).await;
    wait_for_state(&peer, "good", InstanceState::Serving).await;

    host.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_port_in_use_fails_only_that_tunnel() {
    let upstream = start_echo_server().await;
    let good = tunnel_config("good", upstream.addr);
    let busy = tunnel_config("busy", upstream.addr);
    let _squatter = tokio::net::TcpListener::bind(peer_addr(&busy)).await.unwrap();

    let mut peer = Supervisor::new(Role::Peer, TransportConfig::loopback(), fast_settings());
    assert_eq!(peer.start(&[busy, good.clone()]).await, 1);
    assert!(matches!(peer.failures()[0].error, TunnelError::Bind { .. }));

    let mut host = start_supervisor(Role::Host, std::slice::from_ref(&good)).await;
    wait_for_state(&host, "good", InstanceState::Serving).await;

    host.shutdown().await;
    peer.shutdown().await;
}
