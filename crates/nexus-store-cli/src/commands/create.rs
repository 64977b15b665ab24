use super::{OutputContext, store_config};
use anyhow::Result;
use clap::Args;
use nexus_store::{FormatVersion, GraphStore, StoreSettings};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Args)]
pub struct CreateArgs {
    /// Store directory; must be missing or empty
    pub dir: PathBuf,
}

#[derive(Serialize)]
struct Created {
    path: PathBuf,
    version: FormatVersion,
}

pub fn execute(args: CreateArgs, settings: StoreSettings, output: &OutputContext) -> Result<()> {
    let store = GraphStore::create(&args.dir, store_config(settings))?;
    store.close()?;
    let created = Created {
        path: args.dir,
        version: FormatVersion::CURRENT,
    };
    output.emit(&created, |c| {
        println!("Created {} store at {}", c.version, c.path.display());
    })
}
