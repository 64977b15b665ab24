//! Shared fixtures

use crate::fs::{FileSystemAbstraction, OpenMode};
use crate::value::{ArrayValue, PropertyValue};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// Int array long enough to need a multi-block chain
pub fn make_long_array() -> PropertyValue {
    PropertyValue::Array(ArrayValue::Int((0..100).collect()))
}

/// 1000-character string
pub fn make_long_string() -> PropertyValue {
    PropertyValue::String("characters".repeat(100))
}

/// Every entry under `dir`, keyed by relative path: `None` for
/// directories, the file bytes otherwise
pub fn snapshot_dir(
    fs: &dyn FileSystemAbstraction,
    dir: &Path,
) -> io::Result<BTreeMap<PathBuf, Option<Vec<u8>>>> {
    let mut snapshot = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs.list_dir(&current)? {
            let relative = entry
                .path
                .strip_prefix(dir)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| entry.path.clone());
            if entry.is_dir {
                snapshot.insert(relative, None);
                pending.push(entry.path);
            } else {
                let bytes = fs.open(&entry.path, OpenMode::Read)?.read_all()?;
                snapshot.insert(relative, Some(bytes));
            }
        }
    }
    Ok(snapshot)
}
