//! File system wrapper that injects I/O failures

use crate::fs::{DirEntry, FileSystemAbstraction, OpenMode, StoreFile};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct WriteFault {
    prefix: PathBuf,
    remaining: u64,
}

#[derive(Debug)]
struct RenameFault {
    prefix: PathBuf,
    kind: io::ErrorKind,
}

#[derive(Debug, Default)]
struct FaultState {
    write: Mutex<Option<WriteFault>>,
    rename: Mutex<Option<RenameFault>>,
    injected: AtomicU64,
}

impl FaultState {
    fn check_write(&self, path: &Path) -> io::Result<()> {
        let mut guard = self.write.lock();
        let Some(fault) = guard.as_mut() else {
            return Ok(());
        };
        if !path.starts_with(&fault.prefix) {
            return Ok(());
        }
        if fault.remaining == 0 {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(io::Error::other(format!(
                "injected write fault on {}",
                path.display()
            )));
        }
        fault.remaining -= 1;
        Ok(())
    }

    fn check_rename(&self, from: &Path) -> io::Result<()> {
        let guard = self.rename.lock();
        match guard.as_ref() {
            Some(fault) if from.starts_with(&fault.prefix) => {
                self.injected.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::new(
                    fault.kind,
                    format!("injected rename fault on {}", from.display()),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Wraps a file system and fails selected operations
///
/// Clones share their fault configuration.
#[derive(Debug, Clone)]
pub struct FaultyFileSystem {
    inner: Arc<dyn FileSystemAbstraction>,
    state: Arc<FaultState>,
}

impl FaultyFileSystem {
    /// Wrap `inner` with no faults armed
    pub fn new(inner: Arc<dyn FileSystemAbstraction>) -> Self {
        Self {
            inner,
            state: Arc::new(FaultState::default()),
        }
    }

    /// Let `writes` more writes under `prefix` succeed, then fail every
    /// later one. Writes are `write_at`, `append` and `set_len` calls.
    pub fn fail_writes_after(&self, prefix: impl Into<PathBuf>, writes: u64) {
        *self.state.write.lock() = Some(WriteFault {
            prefix: prefix.into(),
            remaining: writes,
        });
    }

    /// Fail every rename whose source lies under `prefix` with `kind`
    pub fn fail_renames_from(&self, prefix: impl Into<PathBuf>, kind: io::ErrorKind) {
        *self.state.rename.lock() = Some(RenameFault {
            prefix: prefix.into(),
            kind,
        });
    }

    /// Disarm all faults
    pub fn clear(&self) {
        *self.state.write.lock() = None;
        *self.state.rename.lock() = None;
    }

    /// Number of failures injected so far
    pub fn injected_faults(&self) -> u64 {
        self.state.injected.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct FaultyFile {
    path: PathBuf,
    inner: Box<dyn StoreFile>,
    state: Arc<FaultState>,
}

impl StoreFile for FaultyFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.state.check_write(&self.path)?;
        self.inner.write_at(offset, data)
    }

    fn len(&self) -> io::Result<u64> {
        self.inner.len()
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.state.check_write(&self.path)?;
        self.inner.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.inner.sync()
    }

    fn append(&self, data: &[u8]) -> io::Result<()> {
        self.state.check_write(&self.path)?;
        self.inner.append(data)
    }
}

impl FileSystemAbstraction for FaultyFileSystem {
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StoreFile>> {
        let inner = self.inner.open(path, mode)?;
        Ok(Box::new(FaultyFile {
            path: path.to_path_buf(),
            inner,
            state: self.state.clone(),
        }))
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        self.inner.list_dir(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.inner.file_size(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.state.check_rename(from)?;
        self.inner.rename(from, to)
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        self.inner.delete_file(path)
    }

    fn delete_recursively(&self, path: &Path) -> io::Result<()> {
        self.inner.delete_recursively(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::EphemeralFileSystem;

    #[test]
    fn test_write_budget() {
        let fs = FaultyFileSystem::new(Arc::new(EphemeralFileSystem::new()));
        fs.create_dir_all(Path::new("/a")).unwrap();
        fs.fail_writes_after("/a", 1);

        let file = fs.open(Path::new("/a/f"), OpenMode::Truncate).unwrap();
        file.write_at(0, b"one").unwrap();
        assert!(file.write_at(3, b"two").is_err());
        assert_eq!(fs.injected_faults(), 1);

        fs.clear();
        file.write_at(3, b"two").unwrap();
        assert_eq!(file.read_all().unwrap(), b"onetwo");
    }

    #[test]
    fn test_rename_fault_is_scoped() {
        let fs = FaultyFileSystem::new(Arc::new(EphemeralFileSystem::new()));
        fs.create_dir_all(Path::new("/x/src")).unwrap();
        fs.create_dir_all(Path::new("/y")).unwrap();
        fs.fail_renames_from("/y", io::ErrorKind::CrossesDevices);

        let err = fs.rename(Path::new("/y"), Path::new("/z")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::CrossesDevices);
        fs.rename(Path::new("/x/src"), Path::new("/x/dst")).unwrap();
        assert!(fs.exists(Path::new("/x/dst")));
    }
}
