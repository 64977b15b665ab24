//! In-memory file system double
//!
//! Files and directories live in a shared tree keyed by path. Open handles
//! keep a reference to the file contents, so a rename does not invalidate
//! them, mirroring POSIX semantics closely enough for the store engine.

use super::{DirEntry, FileSystemAbstraction, OpenMode, StoreFile};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type FileData = Arc<RwLock<Vec<u8>>>;

#[derive(Debug, Clone)]
enum Entry {
    Dir,
    File(FileData),
}

/// Fully in-memory [`FileSystemAbstraction`]; clones share the same tree
#[derive(Debug, Clone, Default)]
pub struct EphemeralFileSystem {
    entries: Arc<Mutex<BTreeMap<PathBuf, Entry>>>,
}

#[derive(Debug)]
struct EphemeralFile {
    data: FileData,
    writable: bool,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    )
}

fn has_root_parent(path: &Path) -> bool {
    match path.parent() {
        None => true,
        Some(parent) => parent.as_os_str().is_empty() || parent.parent().is_none(),
    }
}

impl EphemeralFileSystem {
    /// Create an empty file system
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes held by all files
    pub fn total_bytes(&self) -> u64 {
        self.entries
            .lock()
            .values()
            .map(|entry| match entry {
                Entry::File(data) => data.read().len() as u64,
                Entry::Dir => 0,
            })
            .sum()
    }

    fn check_parent(entries: &BTreeMap<PathBuf, Entry>, path: &Path) -> io::Result<()> {
        if has_root_parent(path) {
            return Ok(());
        }
        let parent = path.parent().unwrap_or(path);
        match entries.get(parent) {
            Some(Entry::Dir) => Ok(()),
            Some(Entry::File(_)) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", parent.display()),
            )),
            None => Err(not_found(parent)),
        }
    }
}

impl StoreFile for EphemeralFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let data = self.data.read();
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "range overflow"))?;
        if end > data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of file",
            ));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, src: &[u8]) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file opened read-only",
            ));
        }
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset overflow"))?;
        let end = start
            .checked_add(src.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "range overflow"))?;
        let mut data = self.data.write();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file opened read-only",
            ));
        }
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length overflow"))?;
        self.data.write().resize(len, 0);
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }
}

impl FileSystemAbstraction for EphemeralFileSystem {
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StoreFile>> {
        let mut entries = self.entries.lock();
        let data = match (entries.get(path), mode) {
            (Some(Entry::Dir), _) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} is a directory", path.display()),
                ));
            }
            (Some(Entry::File(data)), OpenMode::Truncate) => {
                data.write().clear();
                data.clone()
            }
            (Some(Entry::File(data)), _) => data.clone(),
            (None, OpenMode::Read | OpenMode::ReadWrite) => return Err(not_found(path)),
            (None, OpenMode::Truncate | OpenMode::Append) => {
                Self::check_parent(&entries, path)?;
                let data: FileData = Arc::new(RwLock::new(Vec::new()));
                entries.insert(path.to_path_buf(), Entry::File(data.clone()));
                data
            }
        };
        Ok(Box::new(EphemeralFile {
            data,
            writable: mode.is_writable(),
        }))
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ));
        }
        Self::check_parent(&entries, path)?;
        entries.insert(path.to_path_buf(), Entry::Dir);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut entries = self.entries.lock();
        let mut missing = Vec::new();
        let mut current = Some(path);
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() || dir.parent().is_none() {
                break;
            }
            match entries.get(dir) {
                Some(Entry::Dir) => break,
                Some(Entry::File(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("{} is a file", dir.display()),
                    ));
                }
                None => missing.push(dir.to_path_buf()),
            }
            current = dir.parent();
        }
        for dir in missing {
            entries.insert(dir, Entry::Dir);
        }
        Ok(())
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let entries = self.entries.lock();
        match entries.get(path) {
            Some(Entry::Dir) => {}
            Some(Entry::File(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    format!("{} is not a directory", path.display()),
                ));
            }
            None if path.parent().is_none() => {}
            None => return Err(not_found(path)),
        }
        Ok(entries
            .iter()
            .filter(|(p, _)| p.parent() == Some(path))
            .map(|(p, entry)| DirEntry {
                path: p.clone(),
                is_dir: matches!(entry, Entry::Dir),
            })
            .collect())
    }

    fn exists(&self, path: &Path) -> bool {
        self.entries.lock().contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.entries.lock().get(path), Some(Entry::Dir))
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        match self.entries.lock().get(path) {
            Some(Entry::File(data)) => Ok(data.read().len() as u64),
            Some(Entry::Dir) => Ok(0),
            None => Err(not_found(path)),
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut entries = self.entries.lock();
        let source = entries.get(from).cloned().ok_or_else(|| not_found(from))?;
        Self::check_parent(&entries, to)?;
        if to.starts_with(from) && to != from {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot move a directory into itself",
            ));
        }
        match (entries.get(to), &source) {
            (Some(Entry::Dir), _) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", to.display()),
                ));
            }
            (Some(Entry::File(_)), Entry::Dir) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} is a file", to.display()),
                ));
            }
            _ => {}
        }

        let moved: Vec<PathBuf> = entries
            .keys()
            .filter(|p| p.starts_with(from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(entry) = entries.remove(&old) {
                let suffix = old.strip_prefix(from).unwrap_or(Path::new(""));
                let new = if suffix.as_os_str().is_empty() {
                    to.to_path_buf()
                } else {
                    to.join(suffix)
                };
                entries.insert(new, entry);
            }
        }
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some(Entry::File(_)) => {
                entries.remove(path);
                Ok(())
            }
            Some(Entry::Dir) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path.display()),
            )),
            None => Err(not_found(path)),
        }
    }

    fn delete_recursively(&self, path: &Path) -> io::Result<()> {
        self.entries.lock().retain(|p, _| !p.starts_with(path));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_requires_parent() {
        let fs = EphemeralFileSystem::new();
        let err = fs
            .open(Path::new("/missing/file"), OpenMode::Truncate)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        fs.create_dir_all(Path::new("/a/b/c")).unwrap();
        assert!(fs.is_dir(Path::new("/a")));
        assert!(fs.is_dir(Path::new("/a/b")));
        fs.open(Path::new("/a/b/c/file"), OpenMode::Truncate).unwrap();
    }

    #[test]
    fn test_rename_directory_moves_children() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/src/nested")).unwrap();
        fs.open(Path::new("/src/nested/f"), OpenMode::Truncate)
            .unwrap()
            .write_at(0, b"abc")
            .unwrap();

        fs.rename(Path::new("/src"), Path::new("/dst")).unwrap();

        assert!(!fs.exists(Path::new("/src")));
        assert!(fs.is_dir(Path::new("/dst/nested")));
        assert_eq!(fs.file_size(Path::new("/dst/nested/f")).unwrap(), 3);
    }

    #[test]
    fn test_open_handle_survives_rename() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/d")).unwrap();
        let handle = fs.open(Path::new("/d/f"), OpenMode::Truncate).unwrap();
        fs.rename(Path::new("/d/f"), Path::new("/d/g")).unwrap();
        handle.write_at(0, b"xy").unwrap();
        assert_eq!(fs.file_size(Path::new("/d/g")).unwrap(), 2);
    }

    #[test]
    fn test_list_dir_only_direct_children() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/r/sub")).unwrap();
        fs.open(Path::new("/r/a"), OpenMode::Truncate).unwrap();
        fs.open(Path::new("/r/sub/b"), OpenMode::Truncate).unwrap();

        let listed = fs.list_dir(Path::new("/r")).unwrap();
        let names: Vec<_> = listed.iter().map(|e| e.path.clone()).collect();
        assert_eq!(names, vec![PathBuf::from("/r/a"), PathBuf::from("/r/sub")]);
    }

    #[test]
    fn test_delete_recursively() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/x/y")).unwrap();
        fs.open(Path::new("/x/y/z"), OpenMode::Truncate).unwrap();
        fs.create_dir_all(Path::new("/xy")).unwrap();

        fs.delete_recursively(Path::new("/x")).unwrap();
        assert!(!fs.exists(Path::new("/x/y/z")));
        assert!(!fs.exists(Path::new("/x")));
        assert!(fs.exists(Path::new("/xy")));
    }
}
