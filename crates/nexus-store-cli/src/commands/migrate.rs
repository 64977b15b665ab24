use super::{OutputContext, store_config};
use anyhow::{Result, bail};
use clap::Args;
use nexus_store::migration::upgrade_staging_dir;
use nexus_store::{MigrationStatus, StoreMigrator, StoreSettings};
use std::path::PathBuf;
use tracing::info;

#[derive(Args)]
pub struct MigrateArgs {
    /// Store directory to upgrade in place
    pub dir: PathBuf,

    /// Directory the new store is built in; defaults to `<dir>.upgrade`
    #[arg(long)]
    pub target: Option<PathBuf>,

    /// Copy stores one after another instead of in parallel
    #[arg(long)]
    pub sequential: bool,
}

pub fn execute(args: MigrateArgs, mut settings: StoreSettings, output: &OutputContext) -> Result<()> {
    if args.sequential {
        settings.parallel_migration = false;
    }
    let target = args
        .target
        .unwrap_or_else(|| upgrade_staging_dir(&args.dir));
    info!(source = %args.dir.display(), target = %target.display(), "migrating store");

    let migrator = StoreMigrator::new(store_config(settings));
    let result = migrator.migrate(&args.dir, &target);

    output.emit(&result.stats, |stats| match result.status {
        MigrationStatus::Committed => {
            println!(
                "Migrated {} from {} to {}: {} records in {} ms",
                args.dir.display(),
                stats
                    .source_version
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                stats.target_version,
                stats.records_copied(),
                stats.elapsed_ms
            );
            if output.verbose {
                for (kind, pass) in &stats.stores {
                    println!(
                        "  {:<26} {:>10} copied {:>10} skipped  (high id {})",
                        kind.to_string(),
                        pass.records_copied,
                        pass.records_skipped,
                        pass.high_id
                    );
                }
            }
        }
        MigrationStatus::NoOp => println!("{} is already current", args.dir.display()),
        MigrationStatus::Failed | MigrationStatus::Cancelled => {}
    })?;

    match result.status {
        MigrationStatus::Committed | MigrationStatus::NoOp => Ok(()),
        MigrationStatus::Failed | MigrationStatus::Cancelled => {
            let detail = result
                .error_detail()
                .unwrap_or_else(|| format!("{:?}", result.status));
            bail!("migration of {} failed: {detail}", args.dir.display())
        }
    }
}
