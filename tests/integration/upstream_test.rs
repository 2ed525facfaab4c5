use super::{
    dead_addr, echo_round_trip, expect_closed_promptly, peer_addr, start_echo_server_at,
    start_pair, tunnel_config,
};
use vtunnel_core::InstanceState;

#[tokio::test]
async fn test_unreachable_upstream_closes_client() {
    let tunnel = tunnel_config("down", dead_addr());
    let (mut host, mut peer) = start_pair(std::slice::from_ref(&tunnel)).await;

    expect_closed_promptly(peer_addr(&tunnel)).await;

    // A failed dial is per connection; the tunnel itself stays up.
    assert_eq!(host.state_of("down"), Some(InstanceState::Serving));
    assert_eq!(peer.state_of("down"), Some(InstanceState::Serving));

    host.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_upstream_closing_early_closes_client() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    // Upstream answers once and hangs up.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.write_all(b"bye").await;
        }
    });

    let tunnel = tunnel_config("hangup", upstream);
    let (mut host, mut peer) = start_pair(std::slice::from_ref(&tunnel)).await;

    let mut stream = TcpStream::connect(peer_addr(&tunnel)).await.unwrap();
    let mut received = Vec::new();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        stream.read_to_end(&mut received),
    )
    .await
    .expect("client was not closed")
    .unwrap();
    assert_eq!(received, b"bye");

    host.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_upstream_recovers_without_restart() {
    let upstream_addr = dead_addr();
    let tunnel = tunnel_config("later", upstream_addr);
    let (mut host, mut peer) = start_pair(std::slice::from_ref(&tunnel)).await;

    expect_closed_promptly(peer_addr(&tunnel)).await;

    // The upstream appears on the configured address; the next client gets through.
    let upstream = start_echo_server_at(upstream_addr).await;
    assert_eq!(echo_round_trip(peer_addr(&tunnel), b"ok").await, b"ok");
    assert_eq!(upstream.accepted(), 1);

    host.shutdown().await;
    peer.shutdown().await;
}
