//! Transport layer abstraction for the host/guest channel
//!
//! The host and the peer talk over VM sockets, addressed by context ID and
//! port. [`TransportConfig::Tcp`] emulates the same port-addressed channel on
//! plain TCP so both halves can run on one machine for development and tests.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

pub mod socket_tuning;
pub mod tcp;
pub mod vsock;

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

pub type BoxedStream = Pin<Box<dyn AsyncStream>>;

/// How this process reaches the opposite side of the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportConfig {
    /// VM sockets. Listeners bind `VMADDR_CID_ANY`; dials go to `remote_cid`.
    Vsock { remote_cid: u32 },
    /// TCP emulation. Listeners bind `bind_ip`; dials go to `remote_ip`.
    Tcp { bind_ip: IpAddr, remote_ip: IpAddr },
}

impl TransportConfig {
    /// Loopback TCP emulation, both halves on one machine.
    pub fn loopback() -> Self {
        TransportConfig::Tcp {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            remote_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    /// Human readable description of the remote endpoint at `port`.
    pub fn describe_remote(&self, port: u32) -> String {
        match self {
            TransportConfig::Vsock { remote_cid } => format!("vsock://{remote_cid}:{port}"),
            TransportConfig::Tcp { remote_ip, .. } => {
                format!("tcp://{}", SocketAddr::new(*remote_ip, port_u16(port).unwrap_or(0)))
            }
        }
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportConfig::Vsock { remote_cid } => write!(f, "vsock(remote cid {remote_cid})"),
            TransportConfig::Tcp { bind_ip, remote_ip } => {
                write!(f, "tcp(bind {bind_ip}, remote {remote_ip})")
            }
        }
    }
}

/// A listener on either transport, or on the peer's guest-facing TCP socket.
pub enum TransportListener {
    Tcp(TcpListener),
    #[cfg(target_os = "linux")]
    Vsock(tokio_vsock::VsockListener),
}

impl TransportListener {
    /// Wrap an ordinary TCP listener.
    pub fn tcp(listener: TcpListener) -> Self {
        TransportListener::Tcp(listener)
    }

    /// Accept one connection and describe where it came from.
    pub async fn accept(&mut self) -> io::Result<(BoxedStream, String)> {
        match self {
            TransportListener::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                socket_tuning::configure_socket_silent(&stream);
                Ok((Box::pin(stream), addr.to_string()))
            }
            #[cfg(target_os = "linux")]
            TransportListener::Vsock(listener) => vsock::accept(listener).await,
        }
    }

    /// Describe the local endpoint for logs.
    pub fn local_description(&self) -> String {
        match self {
            TransportListener::Tcp(listener) => listener
                .local_addr()
                .map_or_else(|_| "tcp://?".to_string(), |a| format!("tcp://{a}")),
            #[cfg(target_os = "linux")]
            TransportListener::Vsock(listener) => vsock::local_description(listener),
        }
    }
}

impl fmt::Debug for TransportListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransportListener")
            .field(&self.local_description())
            .finish()
    }
}

/// Bind a transport listener on `port`.
pub async fn bind(config: &TransportConfig, port: u32) -> io::Result<TransportListener> {
    match config {
        TransportConfig::Tcp { bind_ip, .. } => {
            let addr = SocketAddr::new(*bind_ip, port_u16(port)?);
            Ok(TransportListener::Tcp(tcp::bind(addr).await?))
        }
        TransportConfig::Vsock { .. } => vsock::bind(port),
    }
}

/// Dial the opposite side on `port`.
pub async fn connect(config: &TransportConfig, port: u32) -> io::Result<BoxedStream> {
    match config {
        TransportConfig::Tcp { remote_ip, .. } => {
            let addr = SocketAddr::new(*remote_ip, port_u16(port)?);
            tcp::connect(&addr.to_string()).await
        }
        TransportConfig::Vsock { remote_cid } => vsock::connect(*remote_cid, port).await,
    }
}

fn port_u16(port: u32) -> io::Result<u16> {
    u16::try_from(port).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("port {port} does not fit the TCP transport"),
        )
    })
}
