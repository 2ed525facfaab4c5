//! Plain TCP: the peer's guest-facing listener, upstream dials on the host,
//! and the TCP emulation of the VM-socket transport.

use super::socket_tuning::configure_socket_silent;
use super::BoxedStream;
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};

pub async fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Dial `addr` (`host:port`, resolved by tokio).
pub async fn connect(addr: &str) -> io::Result<BoxedStream> {
    let stream = TcpStream::connect(addr).await?;
    configure_socket_silent(&stream);
    Ok(Box::pin(stream))
}
