//! Store format migration
//!
//! Upgrades a store directory written in a legacy format to the current
//! one. A run walks through these phases:
//!
//! 1. **Detected**: every store file of the source agrees on one version
//! 2. **Preparing**: the target directory is created with empty current stores
//! 3. **Copying**: one pass per store kind, run in parallel, preserving ids
//! 4. **Verifying**: the target is reopened, checked and compared to the source
//! 5. **Committed**: the target replaces the source directory
//!
//! A failure or cancellation in any phase aborts the run: the target is
//! deleted and the source is left exactly as it was found.
//!
//! ```no_run
//! use nexus_store::config::StoreConfig;
//! use nexus_store::migration::{MigrationStatus, StoreMigrator};
//! use std::path::Path;
//!
//! let migrator = StoreMigrator::new(StoreConfig::on_disk());
//! let result = migrator.migrate(Path::new("data/graph"), Path::new("data/graph.upgrade"));
//! assert_eq!(result.status, MigrationStatus::Committed);
//! ```

mod commit;
mod copy;
mod layout;
mod mapping;
mod verify;
mod version;

pub use copy::PassStats;
pub use layout::{
    FieldSpec, LEGACY_NO_ID, LegacyIdFile, LegacyLayout, LegacyStore, Width, legacy_block_size,
    legacy_layout,
};
pub use mapping::{FieldRule, field_mapping, is_migratable, map_fields};
pub use version::{detect_supported_version, detect_version};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::fs::FileSystemAbstraction;
use crate::kind::StoreKind;
use crate::store::{FormatVersion, GraphStore};
use copy::PassControl;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Phase of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    /// Source version detected
    Detected,
    /// Target directory being prepared
    Preparing,
    /// Records being copied
    Copying,
    /// Target being verified against the source
    Verifying,
    /// Target installed in place of the source
    Committed,
    /// Run abandoned, target removed
    Aborted,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::Detected => "detected",
            MigrationPhase::Preparing => "preparing",
            MigrationPhase::Copying => "copying",
            MigrationPhase::Verifying => "verifying",
            MigrationPhase::Committed => "committed",
            MigrationPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Outcome of a migration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Source upgraded in place
    Committed,
    /// Source already current, nothing done
    NoOp,
    /// Run failed and was rolled back
    Failed,
    /// Run cancelled and rolled back
    Cancelled,
}

/// Counters of a migration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStats {
    /// Detected source version
    pub source_version: Option<FormatVersion>,
    /// Version the target is written in
    pub target_version: FormatVersion,
    /// Per-store pass counters
    pub stores: BTreeMap<StoreKind, PassStats>,
    /// Wall time of the run
    pub elapsed_ms: u64,
}

impl Default for MigrationStats {
    fn default() -> Self {
        Self {
            source_version: None,
            target_version: FormatVersion::CURRENT,
            stores: BTreeMap::new(),
            elapsed_ms: 0,
        }
    }
}

impl MigrationStats {
    /// Records copied across all stores
    pub fn records_copied(&self) -> u64 {
        self.stores.values().map(|s| s.records_copied).sum()
    }
}

/// Result of [`StoreMigrator::migrate`]
#[derive(Debug)]
pub struct MigrationResult {
    /// Outcome
    pub status: MigrationStatus,
    /// Final phase: `Committed`, `Detected` for a no-op, `Aborted` on failure
    pub phase: MigrationPhase,
    /// Phase the run failed in
    pub failed_phase: Option<MigrationPhase>,
    /// Cause of a failed or cancelled run
    pub error: Option<Error>,
    /// Counters
    pub stats: MigrationStats,
}

impl MigrationResult {
    /// Whether the source is now in the current format
    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            MigrationStatus::Committed | MigrationStatus::NoOp
        )
    }

    /// Human-readable failure description
    pub fn error_detail(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        Some(match self.failed_phase {
            Some(phase) => format!("{error} (while {phase})"),
            None => error.to_string(),
        })
    }

    /// Error for a run that did not succeed
    pub fn into_error(self) -> Error {
        match (self.error, self.status) {
            (Some(error), _) => error,
            (None, MigrationStatus::Cancelled) => Error::Cancelled,
            (None, status) => Error::storage(format!("migration ended as {status:?}")),
        }
    }

    /// Stats of a successful run, the error otherwise
    pub fn into_result(self) -> Result<MigrationStats> {
        if self.is_success() {
            Ok(self.stats)
        } else {
            Err(self.into_error())
        }
    }
}

/// Shared flag for cancelling a running migration from another thread
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`Error::Cancelled`] once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Directory a store is migrated into before an in-place upgrade
pub fn upgrade_staging_dir(dir: &Path) -> PathBuf {
    sibling(dir, "upgrade")
}

/// Directory the source is moved to while the migrated store is installed
pub fn backup_dir(dir: &Path) -> PathBuf {
    sibling(dir, "legacy")
}

/// `<dir>.<suffix>` next to `dir`
pub(crate) fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "store".into());
    name.push(".");
    name.push(suffix);
    dir.with_file_name(name)
}

/// Every legacy store of a source directory, opened read-only
pub(crate) struct LegacyStores {
    stores: Vec<LegacyStore>,
}

impl LegacyStores {
    fn open(fs: &dyn FileSystemAbstraction, dir: &Path, version: FormatVersion) -> Result<Self> {
        let stores = StoreKind::ALL
            .iter()
            .map(|&kind| LegacyStore::open(fs, dir, kind, version))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stores })
    }

    pub(crate) fn get(&self, kind: StoreKind) -> Result<&LegacyStore> {
        self.stores
            .iter()
            .find(|s| s.kind() == kind)
            .ok_or_else(|| Error::storage(format!("no legacy store for {kind}")))
    }
}

/// Progress of one run
#[derive(Default)]
struct Run {
    phase: Option<MigrationPhase>,
    created_target: bool,
    stats: MigrationStats,
}

impl Run {
    fn enter(&mut self, phase: MigrationPhase) {
        info!(phase = %phase, "migration phase");
        self.phase = Some(phase);
    }
}

/// Migrates a store directory to the current format
#[derive(Debug, Clone)]
pub struct StoreMigrator {
    config: StoreConfig,
    cancel: CancellationToken,
}

impl StoreMigrator {
    /// Create a migrator; `config` supplies the file system and settings of
    /// the target store
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels runs of this migrator
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Migrate `source` into `target`, then install the result at `source`.
    ///
    /// `target` must not exist. It is deleted again whatever the outcome:
    /// renamed into place on success, removed on failure.
    pub fn migrate(&self, source: &Path, target: &Path) -> MigrationResult {
        let started = Instant::now();
        let mut run = Run::default();
        info!(source = %source.display(), target = %target.display(), "starting migration");

        let outcome = self.run(source, target, &mut run);
        run.stats.elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(status) => {
                info!(
                    status = ?status,
                    records = run.stats.records_copied(),
                    elapsed_ms = run.stats.elapsed_ms,
                    "migration finished"
                );
                MigrationResult {
                    status,
                    phase: run.phase.unwrap_or(MigrationPhase::Detected),
                    failed_phase: None,
                    error: None,
                    stats: run.stats,
                }
            }
            Err(error) => {
                let failed_phase = run.phase;
                self.abort(target, &mut run);
                let status = if matches!(error, Error::Cancelled) {
                    MigrationStatus::Cancelled
                } else {
                    MigrationStatus::Failed
                };
                warn!(
                    phase = ?failed_phase,
                    error = %error,
                    "migration aborted"
                );
                MigrationResult {
                    status,
                    phase: MigrationPhase::Aborted,
                    failed_phase,
                    error: Some(error),
                    stats: run.stats,
                }
            }
        }
    }

    fn run(&self, source: &Path, target: &Path, run: &mut Run) -> Result<MigrationStatus> {
        let fs = self.config.fs.as_ref();
        self.config.settings.validate()?;

        run.enter(MigrationPhase::Detected);
        let version = detect_supported_version(fs, source)?;
        run.stats.source_version = Some(version);
        if version.is_current() {
            info!(path = %source.display(), version = %version, "store already current");
            return Ok(MigrationStatus::NoOp);
        }
        self.cancel.check()?;

        run.enter(MigrationPhase::Preparing);
        if fs.exists(target) {
            return Err(Error::storage(format!(
                "migration target {} already exists",
                target.display()
            )));
        }
        let legacy = LegacyStores::open(fs, source, version)?;
        fs.create_dir_all(target)?;
        run.created_target = true;
        let store = GraphStore::create(target, self.config.clone())?;
        self.cancel.check()?;

        run.enter(MigrationPhase::Copying);
        run.stats.stores = self.copy_all(&legacy, &store, version)?;
        store.close()?;

        run.enter(MigrationPhase::Verifying);
        let store = GraphStore::open(target, self.config.clone())?;
        let failed = AtomicBool::new(false);
        let control = PassControl::new(
            &self.cancel,
            &failed,
            self.config.settings.migration_batch_size,
        );
        verify::verify(&legacy, &store, version, &control)?;
        store.close()?;
        drop(legacy);
        self.cancel.check()?;

        run.enter(MigrationPhase::Committed);
        commit::commit(fs, source, target)?;
        Ok(MigrationStatus::Committed)
    }

    fn copy_all(
        &self,
        legacy: &LegacyStores,
        store: &GraphStore,
        version: FormatVersion,
    ) -> Result<BTreeMap<StoreKind, PassStats>> {
        let failed = AtomicBool::new(false);
        let control = PassControl::new(
            &self.cancel,
            &failed,
            self.config.settings.migration_batch_size,
        );
        let pass = |kind: StoreKind| -> Result<(StoreKind, PassStats)> {
            let result = legacy
                .get(kind)
                .and_then(|source| copy::copy_store(source, store, version, &control));
            if result.is_err() {
                control.mark_failed();
            }
            result.map(|stats| (kind, stats))
        };

        let results: Vec<Result<(StoreKind, PassStats)>> =
            if self.config.settings.parallel_migration {
                StoreKind::ALL.par_iter().map(|&kind| pass(kind)).collect()
            } else {
                StoreKind::ALL.iter().map(|&kind| pass(kind)).collect()
            };
        collect_passes(results)
    }

    fn abort(&self, target: &Path, run: &mut Run) {
        let fs = self.config.fs.as_ref();
        if run.created_target && fs.exists(target) {
            match fs.delete_recursively(target) {
                Ok(()) => debug!(path = %target.display(), "removed migration target"),
                Err(error) => warn!(
                    path = %target.display(),
                    error = %error,
                    "failed to remove migration target"
                ),
            }
        }
        run.enter(MigrationPhase::Aborted);
    }
}

/// Merge pass results. Passes stopped because a sibling failed report
/// [`Error::Cancelled`]; the sibling's own error wins over those.
fn collect_passes(
    results: Vec<Result<(StoreKind, PassStats)>>,
) -> Result<BTreeMap<StoreKind, PassStats>> {
    let mut stores = BTreeMap::new();
    let mut first_error: Option<Error> = None;
    for result in results {
        match result {
            Ok((kind, stats)) => {
                stores.insert(kind, stats);
            }
            Err(error) => {
                let replace = match &first_error {
                    None => true,
                    Some(Error::Cancelled) => !matches!(error, Error::Cancelled),
                    Some(_) => false,
                };
                if replace {
                    first_error = Some(error);
                }
            }
        }
    }
    match first_error {
        Some(error) => Err(error),
        None => Ok(stores),
    }
}

/// Migrate `source` through `target` with a fresh [`StoreMigrator`]
pub fn migrate(source: &Path, target: &Path, config: &StoreConfig) -> MigrationResult {
    StoreMigrator::new(config.clone()).migrate(source, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_paths() {
        assert_eq!(
            upgrade_staging_dir(Path::new("/data/graph")),
            PathBuf::from("/data/graph.upgrade")
        );
        assert_eq!(backup_dir(Path::new("db")), PathBuf::from("db.legacy"));
    }

    #[test]
    fn test_real_error_wins_over_sibling_cancellation() {
        let results = vec![
            Err(Error::Cancelled),
            Ok((StoreKind::Node, PassStats::default())),
            Err(Error::broken_chain(StoreKind::PropertyString, 3, "cycle detected")),
            Err(Error::Cancelled),
        ];
        assert!(matches!(
            collect_passes(results),
            Err(Error::BrokenChain { id: 3, .. })
        ));
    }

    #[test]
    fn test_result_error_detail() {
        let result = MigrationResult {
            status: MigrationStatus::Failed,
            phase: MigrationPhase::Aborted,
            failed_phase: Some(MigrationPhase::Copying),
            error: Some(Error::storage("disk full")),
            stats: MigrationStats::default(),
        };
        assert!(!result.is_success());
        let detail = result.error_detail().unwrap();
        assert!(detail.contains("disk full"));
        assert!(detail.ends_with("(while copying)"));
        assert!(matches!(result.into_error(), Error::Storage(_)));
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let migrator = StoreMigrator::new(StoreConfig::on_disk()).with_cancellation(token.clone());
        assert!(migrator.cancellation_token().check().is_ok());
        token.cancel();
        assert!(matches!(
            migrator.cancellation_token().check(),
            Err(Error::Cancelled)
        ));
    }
}
