use super::{
    host_data_addr, peer_addr, start_echo_server, start_pair, tunnel_config, wait_port_released,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use vtunnel_core::InstanceState;

#[tokio::test]
async fn test_shutdown_releases_ports_and_connections() {
    let upstream = start_echo_server().await;
    let tunnel = tunnel_config("bye", upstream.addr);
    let (mut host, mut peer) = start_pair(std::slice::from_ref(&tunnel)).await;

    // An idle connection in flight.
    let mut client = TcpStream::connect(peer_addr(&tunnel)).await.unwrap();
    client.write_all(b"hold").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();

    let start = std::time::Instant::now();
    peer.shutdown().await;
    host.shutdown().await;
    assert!(start.elapsed() < Duration::from_secs(5));

    assert_eq!(host.state_of("bye"), Some(InstanceState::Closed));
    assert_eq!(peer.state_of("bye"), Some(InstanceState::Closed));

    // The client sees the close.
    let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .expect("client was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0);

    let handshake = SocketAddr::from((
        [127, 0, 0, 1],
        u16::try_from(tunnel.handshake_port).unwrap(),
    ));
    for addr in [peer_addr(&tunnel), host_data_addr(&tunnel), handshake] {
        assert!(
            wait_port_released(addr, Duration::from_secs(2)).await,
            "{addr} still bound after shutdown"
        );
    }
}

#[tokio::test]
async fn test_shutdown_token_stops_run_until() {
    let upstream = start_echo_server().await;
    let tunnel = tunnel_config("token", upstream.addr);
    let (mut host, mut peer) = start_pair(std::slice::from_ref(&tunnel)).await;

    let token = host.shutdown_token();
    let runner = tokio::spawn(async move {
        host.run_until(std::future::pending()).await;
        host
    });
    token.cancel();
    let host = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(host.state_of("token"), Some(InstanceState::Closed));

    peer.shutdown().await;
}
