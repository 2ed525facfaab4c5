use super::{echo_round_trip, peer_addr, start_echo_server, start_pair, tunnel_config};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn test_ping_through_both_hops() {
    let upstream = start_echo_server().await;
    let tunnel = tunnel_config("echo", upstream.addr);
    let (mut host, mut peer) = start_pair(std::slice::from_ref(&tunnel)).await;

    let reply = echo_round_trip(peer_addr(&tunnel), b"ping").await;
    assert_eq!(reply, b"ping");
    assert_eq!(upstream.accepted(), 1);

    host.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_large_payload_is_unmodified() {
    let upstream = start_echo_server().await;
    let tunnel = tunnel_config("bulk", upstream.addr);
    let (mut host, mut peer) = start_pair(std::slice::from_ref(&tunnel)).await;

    let payload: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 253) as u8).collect();
    let mut stream = TcpStream::connect(peer_addr(&tunnel)).await.unwrap();
    let (mut reader, mut writer) = stream.split();

    let write = async {
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();
    };
    let read = async {
        let mut received = Vec::with_capacity(payload.len());
        reader.read_to_end(&mut received).await.unwrap();
        received
    };
    let ((), received) = tokio::join!(write, read);
    assert_eq!(received.len(), payload.len());
    assert!(received == payload, "payload was modified in transit");

    host.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_clients_are_independent() {
    let upstream = start_echo_server().await;
    let tunnel = tunnel_config("many", upstream.addr);
    let (mut host, mut peer) = start_pair(std::slice::from_ref(&tunnel)).await;

    let addr = peer_addr(&tunnel);
    let mut clients = Vec::new();
    for i in 0..16u8 {
        clients.push(tokio::spawn(async move {
            let payload = vec![i; 4096];
            let reply = echo_round_trip(addr, &payload).await;
            assert_eq!(reply, payload);
        }));
    }
    for client in clients {
        client.await.unwrap();
    }
    assert_eq!(upstream.accepted(), 16);

    host.shutdown().await;
    peer.shutdown().await;
}

#[tokio::test]
async fn test_several_tunnels_side_by_side() {
    let first = start_echo_server().await;
    let second = start_echo_server().await;
    let tunnels = vec![
        tunnel_config("first", first.addr),
        tunnel_config("second", second.addr),
    ];
    let (mut host, mut peer) = start_pair(&tunnels).await;

    assert_eq!(echo_round_trip(peer_addr(&tunnels[0]), b"one").await, b"one");
    assert_eq!(echo_round_trip(peer_addr(&tunnels[1]), b"two").await, b"two");
    assert_eq!(first.accepted(), 1);
    assert_eq!(second.accepted(), 1);

    host.shutdown().await;
    peer.shutdown().await;
}
