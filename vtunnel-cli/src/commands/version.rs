//! Version subcommand implementation

pub fn run() {
    println!("vtunnel {}", env!("CARGO_PKG_VERSION"));

    #[cfg(target_os = "linux")]
    println!("transports: vsock, tcp");
    #[cfg(not(target_os = "linux"))]
    println!("transports: tcp (vsock requires Linux)");
}
