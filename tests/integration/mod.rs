#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for vtunnel
//!
//! Each test runs a host supervisor and a peer supervisor in one process,
//! connected over loopback TCP instead of VM sockets.

mod echo_test;
mod isolation_test;
mod metrics_test;
mod shutdown_test;
mod upstream_test;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use vtunnel_common::{Role, TunnelConfig, TunnelSettings};
use vtunnel_core::{InstanceState, Supervisor, TransportConfig};

static NEXT_PORT: std::sync::atomic::AtomicU16 = std::sync::atomic::AtomicU16::new(30000);

pub fn get_free_port() -> u16 {
    loop {
        let port = NEXT_PORT.fetch_add(1, Ordering::Relaxed);
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return port;
        }
    }
}

/// Timings short enough for tests to observe every transition quickly.
pub fn fast_settings() -> TunnelSettings {
    TunnelSettings {
        probe_initial_interval_ms: 20,
        probe_max_interval_ms: 100,
        probe_timeout_ms: 200,
        probe_jitter: 0.0,
        failure_threshold: 2,
        liveness_window_ms: 600,
        connect_timeout_ms: 1000,
        half_close_timeout_ms: 1000,
        shutdown_grace_ms: 500,
    }
}

/// A tunnel entry on fresh loopback ports.
pub fn tunnel_config(name: &str, upstream: SocketAddr) -> TunnelConfig {
    TunnelConfig {
        name: name.to_string(),
        handshake_port: u32::from(get_free_port()),
        vsock_host_port: u32::from(get_free_port()),
        peer_address: "127.0.0.1".to_string(),
        peer_port: get_free_port(),
        upstream_server_address: upstream.to_string(),
    }
}

pub fn peer_addr(tunnel: &TunnelConfig) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], tunnel.peer_port))
}

/// The host's data listener, reachable directly under the TCP emulation.
pub fn host_data_addr(tunnel: &TunnelConfig) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], u16::try_from(tunnel.vsock_host_port).unwrap()))
}

pub async fn start_supervisor(role: Role, tunnels: &[TunnelConfig]) -> Supervisor {
    let mut supervisor = Supervisor::new(role, TransportConfig::loopback(), fast_settings());
    supervisor.start(tunnels).await;
    supervisor
}

/// Start both halves and wait until `tunnels` are serving on both sides.
pub async fn start_pair(tunnels: &[TunnelConfig]) -> (Supervisor, Supervisor) {
    let peer = start_supervisor(Role::Peer, tunnels).await;
    let host = start_supervisor(Role::Host, tunnels).await;
    for tunnel in tunnels {
        wait_for_state(&host, &tunnel.name, InstanceState::Serving).await;
        wait_for_state(&peer, &tunnel.name, InstanceState::Serving).await;
    }
    (host, peer)
}

pub async fn wait_for_state(supervisor: &Supervisor, name: &str, state: InstanceState) {
    supervisor
        .instance(name)
        .unwrap_or_else(|| panic!("no running instance named {name}"))
        .state()
        .wait_for(state, Duration::from_secs(5))
        .await
        .unwrap();
}

/// Upstream echo server that counts accepted connections.
pub struct EchoServer {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
}

impl EchoServer {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Start an echo server that copies every byte back until EOF.
pub async fn start_echo_server() -> EchoServer {
    start_echo_server_at(SocketAddr::from(([127, 0, 0, 1], 0))).await
}

pub async fn start_echo_server_at(addr: SocketAddr) -> EchoServer {
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 16 * 1024];
                loop {
                    let n = match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    if socket.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    EchoServer { addr, accepted }
}

/// An address nothing listens on.
pub fn dead_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], get_free_port()))
}

/// Send `payload`, read the same number of bytes back.
pub async fn echo_round_trip(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(payload).await.unwrap();
    let mut received = vec![0u8; payload.len()];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut received))
        .await
        .expect("echo timed out")
        .unwrap();
    received
}

/// Connect and expect the connection to be closed without any data.
pub async fn expect_closed_promptly(addr: SocketAddr) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let _ = stream.write_all(b"hello").await;
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
        .await
        .expect("connection was not closed")
        .unwrap_or(0);
    assert_eq!(n, 0, "closed connection must not carry data");
}

/// Wait until `addr` can be bound again.
pub async fn wait_port_released(addr: SocketAddr, timeout: Duration) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if TcpListener::bind(addr).await.is_ok() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}
