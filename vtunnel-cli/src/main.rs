//! vtunnel CLI
//!
//! Relays TCP connections between a virtual machine and its host over VM
//! sockets. Run `vtunnel peer` inside the guest and `vtunnel host` on the
//! host with the same tunnel configuration file.

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vtunnel",
    author,
    version,
    about = "TCP tunnels between a VM and its host over VM sockets",
    long_about = "vtunnel relays TCP connections between a guest and its host.\n\n\
                  The peer accepts clients inside the guest and forwards them over the VM-socket \
                  transport; the host forwards them on to an upstream TCP server.",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host half of every configured tunnel
    Host(commands::host::HostArgs),

    /// Run the peer (guest) half of every configured tunnel
    Peer(commands::peer::PeerArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Host(args) => commands::host::run(args).await,
        Commands::Peer(args) => commands::peer::run(args).await,
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    }
}
