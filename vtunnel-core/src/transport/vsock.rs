//! VM-socket transport (Linux `AF_VSOCK` through `tokio-vsock`).

use super::{BoxedStream, TransportListener};
use std::io;

#[cfg(target_os = "linux")]
use tokio_vsock::{VsockAddr, VsockListener, VsockStream};
#[cfg(target_os = "linux")]
use vtunnel_common::VMADDR_CID_ANY;

#[cfg(target_os = "linux")]
pub(super) fn bind(port: u32) -> io::Result<TransportListener> {
    let listener = VsockListener::bind(VsockAddr::new(VMADDR_CID_ANY, port))?;
    Ok(TransportListener::Vsock(listener))
}

#[cfg(target_os = "linux")]
pub(super) async fn connect(cid: u32, port: u32) -> io::Result<BoxedStream> {
    let stream = VsockStream::connect(VsockAddr::new(cid, port)).await?;
    Ok(Box::pin(stream))
}

#[cfg(target_os = "linux")]
pub(super) async fn accept(listener: &mut VsockListener) -> io::Result<(BoxedStream, String)> {
    let (stream, addr) = listener.accept().await?;
    Ok((
        Box::pin(stream),
        format!("vsock://{}:{}", addr.cid(), addr.port()),
    ))
}

#[cfg(target_os = "linux")]
pub(super) fn local_description(listener: &VsockListener) -> String {
    listener.local_addr().map_or_else(
        |_| "vsock://?".to_string(),
        |a| format!("vsock://{}:{}", a.cid(), a.port()),
    )
}

#[cfg(not(target_os = "linux"))]
pub(super) fn bind(_port: u32) -> io::Result<TransportListener> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub(super) async fn connect(_cid: u32, _port: u32) -> io::Result<BoxedStream> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "VM sockets are only available on Linux; use the tcp transport",
    )
}
