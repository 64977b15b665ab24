use super::{OutputContext, store_config};
use anyhow::Result;
use clap::Args;
use nexus_store::migration::{LegacyStore, detect_version, is_migratable};
use nexus_store::{FormatVersion, GraphStore, StoreKind, StoreSettings};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Args)]
pub struct InfoArgs {
    /// Store directory
    pub dir: PathBuf,
}

#[derive(Serialize)]
struct StoreInfo {
    path: PathBuf,
    version: FormatVersion,
    current: bool,
    migratable: bool,
    in_use: BTreeMap<StoreKind, u64>,
    high_ids: BTreeMap<StoreKind, u64>,
}

pub fn execute(args: InfoArgs, settings: StoreSettings, output: &OutputContext) -> Result<()> {
    let config = store_config(settings);
    let version = detect_version(config.fs.as_ref(), &args.dir)?;

    let (in_use, high_ids) = if version.is_current() {
        let store = GraphStore::open(&args.dir, config)?;
        let stats = store.stats()?;
        store.close()?;
        (stats.in_use, stats.high_ids)
    } else {
        let mut in_use = BTreeMap::new();
        let mut high_ids = BTreeMap::new();
        for kind in StoreKind::ALL {
            let legacy = LegacyStore::open(config.fs.as_ref(), &args.dir, kind, version)?;
            in_use.insert(kind, legacy.in_use_ids()?.len());
            high_ids.insert(kind, legacy.high_id());
        }
        (in_use, high_ids)
    };

    let info = StoreInfo {
        path: args.dir,
        version,
        current: version.is_current(),
        migratable: is_migratable(version),
        in_use,
        high_ids,
    };
    output.emit(&info, |i| {
        println!("Store:   {}", i.path.display());
        println!("Version: {}", i.version);
        if !i.current {
            let hint = if i.migratable {
                "run `nexus-store migrate` to upgrade"
            } else {
                "no upgrade path"
            };
            println!("         legacy format, {hint}");
        }
        for (kind, count) in &i.in_use {
            let high = i.high_ids.get(kind).copied().unwrap_or(0);
            if output.verbose || *count > 0 {
                println!("  {:<26} {count:>10} in use  (high id {high})", kind.to_string());
            }
        }
    })
}
