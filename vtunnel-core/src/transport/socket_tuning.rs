//! Socket tuning for relayed TCP connections
//!
//! - `TCP_NODELAY`: relayed bytes are forwarded as soon as they arrive
//! - TCP keepalive: notice a vanished client or upstream on idle connections

use socket2::SockRef;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;

const KEEPALIVE_TIME: Duration = Duration::from_secs(30);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

pub fn configure_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;

    let keepalive = socket2::TcpKeepalive::new()
        .with_time(KEEPALIVE_TIME)
        .with_interval(KEEPALIVE_INTERVAL);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Tuning is best effort; a socket that refuses it still relays.
pub fn configure_socket_silent(stream: &TcpStream) {
    if let Err(e) = configure_socket(stream) {
        tracing::trace!("Socket tuning skipped: {}", e);
    }
}
