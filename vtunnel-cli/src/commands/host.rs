//! Host subcommand implementation

use super::shared::{run_tunnels, CommonArgs, TransportKind};
use anyhow::{bail, Result};
use clap::Args;
use vtunnel_common::Role;

#[derive(Args, Debug)]
pub struct HostArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Context ID of the guest VM (required with the vsock transport)
    #[arg(long, env = "VTUNNEL_GUEST_CID")]
    pub guest_cid: Option<u32>,
}

pub async fn run(args: HostArgs) -> Result<()> {
    args.common.init_logging();

    let guest_cid = match (args.common.transport, args.guest_cid) {
        (TransportKind::Vsock, None) => bail!("--guest-cid is required with the vsock transport"),
        (_, cid) => cid.unwrap_or_default(),
    };

    let config = args.common.load()?;
    let transport = args.common.transport_config(guest_cid);
    run_tunnels(Role::Host, transport, config, args.common.metrics_bind).await
}
