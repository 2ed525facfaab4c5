use super::{echo_round_trip, peer_addr, start_echo_server, start_pair, tunnel_config};
use vtunnel_observability::{gather_metrics, init_metrics};

#[tokio::test]
async fn test_relay_is_counted() {
    init_metrics();
    let upstream = start_echo_server().await;
    let tunnel = tunnel_config("metered", upstream.addr);
    let (mut host, mut peer) = start_pair(std::slice::from_ref(&tunnel)).await;

    assert_eq!(echo_round_trip(peer_addr(&tunnel), b"count me").await, b"count me");
    host.shutdown().await;
    peer.shutdown().await;

    let text = gather_metrics();
    assert!(text.contains(r#"vtunnel_connections_total{outcome="relayed",role="peer",tunnel="metered"}"#));
    assert!(text.contains(r#"vtunnel_handshake_probes_total{result="ok",role="host",tunnel="metered"}"#));
    assert!(text.contains(r#"vtunnel_tunnel_state{role="host",tunnel="metered"} 4"#));
}
