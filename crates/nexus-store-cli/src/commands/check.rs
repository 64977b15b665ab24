use super::{OutputContext, store_config};
use anyhow::{Result, bail};
use clap::Args;
use nexus_store::{GraphStore, StoreSettings, check_store};
use std::path::PathBuf;

#[derive(Args)]
pub struct CheckArgs {
    /// Store directory
    pub dir: PathBuf,

    /// Maximum number of issues printed in text mode
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

pub fn execute(args: CheckArgs, settings: StoreSettings, output: &OutputContext) -> Result<()> {
    let store = GraphStore::open(&args.dir, store_config(settings))?;
    let report = check_store(&store)?;
    store.close()?;

    output.emit(&report, |r| {
        for (kind, count) in &r.counts {
            println!("  {:<26} {count:>10} in use", kind.to_string());
        }
        for issue in r.issues.iter().take(args.limit) {
            println!("{issue}");
        }
        if r.issues.len() > args.limit {
            println!("... {} more", r.issues.len() - args.limit);
        }
    })?;

    if !report.is_consistent() {
        bail!("{} consistency issues found", report.issues.len());
    }
    if !output.json {
        println!("Store is consistent");
    }
    Ok(())
}
