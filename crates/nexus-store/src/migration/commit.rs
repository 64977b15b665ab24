//! Commit phase: swap the verified target into the source location
//!
//! The source is renamed aside to `<source>.legacy`, the target is moved to
//! the source path, then the backup is removed. When the target sits on
//! another volume the move degrades to a recursive copy into
//! `<source>.incoming` followed by a same-volume rename. A failed install
//! puts the backup back, so the source path is never left without a store.

use super::{backup_dir, sibling};
use crate::error::{Error, Result};
use crate::fs::{FileSystemAbstraction, copy_recursively};
use std::io;
use std::path::Path;
use tracing::{info, warn};

pub(crate) fn commit(fs: &dyn FileSystemAbstraction, source: &Path, target: &Path) -> Result<()> {
    let backup = backup_dir(source);
    if fs.exists(&backup) {
        return Err(Error::storage(format!(
            "{} already exists, remove it before migrating",
            backup.display()
        )));
    }

    fs.rename(source, &backup)?;
    if let Err(error) = install(fs, source, target) {
        if let Err(restore) = fs.rename(&backup, source) {
            warn!(
                path = %source.display(),
                backup = %backup.display(),
                error = %restore,
                "failed to restore source store after a failed commit"
            );
        }
        return Err(error);
    }

    if let Err(error) = fs.delete_recursively(&backup) {
        warn!(path = %backup.display(), error = %error, "failed to delete store backup");
    }
    info!(path = %source.display(), "committed migrated store");
    Ok(())
}

fn install(fs: &dyn FileSystemAbstraction, source: &Path, target: &Path) -> Result<()> {
    match fs.rename(target, source) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            let incoming = sibling(source, "incoming");
            info!(
                from = %target.display(),
                to = %incoming.display(),
                "target on another volume, copying"
            );
            if let Err(error) = copy_then_rename(fs, target, &incoming, source) {
                if let Err(cleanup) = fs.delete_recursively(&incoming) {
                    warn!(path = %incoming.display(), error = %cleanup, "failed to remove partial copy");
                }
                return Err(error);
            }
            if let Err(error) = fs.delete_recursively(target) {
                warn!(path = %target.display(), error = %error, "failed to remove migration target");
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn copy_then_rename(
    fs: &dyn FileSystemAbstraction,
    target: &Path,
    incoming: &Path,
    source: &Path,
) -> Result<()> {
    if fs.exists(incoming) {
        fs.delete_recursively(incoming)?;
    }
    copy_recursively(fs, target, incoming)?;
    fs.rename(incoming, source)?;
    Ok(())
}
