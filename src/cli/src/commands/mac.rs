//! `qsession mac` command.

use clap::Args;
use qsession_runtime::{derive_mac, HostIdentity};

#[derive(Args)]
pub struct MacArgs {
    /// Also print which host identity the address was derived from
    #[arg(long)]
    pub source: bool,
}

pub async fn execute(args: MacArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let identity = HostIdentity::detect();
    let mac = derive_mac(identity.as_str());
    tracing::debug!(source = identity.source(), "Derived guest MAC");
    if args.source {
        println!("{} ({})", mac, identity.source());
    } else {
        println!("{}", mac);
    }
    Ok(0)
}
