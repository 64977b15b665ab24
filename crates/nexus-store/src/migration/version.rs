//! Store format detection

use super::mapping::is_migratable;
use crate::error::{Error, Result};
use crate::fs::{FileSystemAbstraction, OpenMode};
use crate::kind::StoreKind;
use crate::store::{FormatVersion, StoreHeader};
use std::path::Path;
use tracing::debug;

/// Format version of the store in `dir`.
///
/// Every store file must be present and carry the same version; an unknown
/// marker or a mix of versions is [`Error::UnsupportedVersion`].
pub fn detect_version(fs: &dyn FileSystemAbstraction, dir: &Path) -> Result<FormatVersion> {
    let mut detected: Option<(StoreKind, FormatVersion)> = None;
    for kind in StoreKind::ALL {
        let path = dir.join(kind.file_name());
        if !fs.exists(&path) {
            return Err(Error::storage(format!(
                "{} is missing, not a complete store",
                path.display()
            )));
        }
        let file = fs.open(&path, OpenMode::Read)?;
        let header = StoreHeader::read(file.as_ref(), &path)?;
        if header.kind != kind {
            return Err(Error::storage(format!(
                "{} holds {} records, expected {kind}",
                path.display(),
                header.kind
            )));
        }
        match detected {
            None => detected = Some((kind, header.version)),
            Some((first_kind, version)) if version != header.version => {
                return Err(Error::UnsupportedVersion {
                    path,
                    found: format!(
                        "{} (while {first_kind} is at {version})",
                        header.version.marker(kind)
                    ),
                });
            }
            Some(_) => {}
        }
    }

    let (_, version) = detected.ok_or_else(|| Error::storage("no store kinds defined"))?;
    debug!(path = %dir.display(), version = %version, "detected store version");
    Ok(version)
}

/// Detect the version of `dir` and check it is current or migratable
pub fn detect_supported_version(
    fs: &dyn FileSystemAbstraction,
    dir: &Path,
) -> Result<FormatVersion> {
    let version = detect_version(fs, dir)?;
    if version.is_current() || is_migratable(version) {
        Ok(version)
    } else {
        Err(Error::UnsupportedVersion {
            path: dir.to_path_buf(),
            found: version.to_string(),
        })
    }
}
