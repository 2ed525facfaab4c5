//! Peer subcommand implementation

use super::shared::{run_tunnels, CommonArgs};
use anyhow::Result;
use clap::Args;
use vtunnel_common::{Role, VMADDR_CID_HOST};

#[derive(Args, Debug)]
pub struct PeerArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

pub async fn run(args: PeerArgs) -> Result<()> {
    args.common.init_logging();

    let config = args.common.load()?;
    // Inside the guest the host is always reachable at the well-known CID.
    let transport = args.common.transport_config(VMADDR_CID_HOST);
    run_tunnels(Role::Peer, transport, config, args.common.metrics_bind).await
}
