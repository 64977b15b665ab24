//! File system abstraction
//!
//! Every store component reaches the disk through [`FileSystemAbstraction`],
//! never through `std::fs` directly. Two implementations ship with the crate:
//!
//! - [`DefaultFileSystem`]: the real file system, positioned I/O on `std::fs::File`
//! - [`EphemeralFileSystem`]: an in-memory double used by tests and tools
//!
//! Handles returned by [`FileSystemAbstraction::open`] are closed when dropped,
//! so every acquisition is scoped to its owner on all exit paths.

mod copy;
mod disk;
mod ephemeral;

pub use copy::{copy_file, copy_recursively};
pub use disk::DefaultFileSystem;
pub use ephemeral::EphemeralFileSystem;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read only
    Read,
    /// Existing file, read and write, contents kept
    ReadWrite,
    /// Create or truncate, read and write
    Truncate,
    /// Create if missing, contents kept, intended for [`StoreFile::append`]
    Append,
}

impl OpenMode {
    /// Whether handles opened in this mode accept writes
    pub fn is_writable(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Positioned I/O on an open file
pub trait StoreFile: Send + Sync + fmt::Debug {
    /// Read exactly `buf.len()` bytes at `offset`; short reads are `UnexpectedEof`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write all of `data` at `offset`, zero-filling any gap past the end
    fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Current length in bytes
    fn len(&self) -> io::Result<u64>;

    /// Returns true if the file is empty
    fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Truncate or zero-extend to `len` bytes
    fn set_len(&self, len: u64) -> io::Result<()>;

    /// Flush data and metadata to stable storage
    fn sync(&self) -> io::Result<()>;

    /// Append `data` at the current end of file
    fn append(&self, data: &[u8]) -> io::Result<()> {
        let end = self.len()?;
        self.write_at(end, data)
    }

    /// Read the whole file into memory
    fn read_all(&self) -> io::Result<Vec<u8>> {
        let len = usize::try_from(self.len()?)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "file too large"))?;
        let mut buf = vec![0u8; len];
        self.read_at(0, &mut buf)?;
        Ok(buf)
    }
}

/// Entry returned by [`FileSystemAbstraction::list_dir`]
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    /// Full path of the entry
    pub path: PathBuf,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

impl DirEntry {
    /// Last path component
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }
}

/// File system primitives consumed by the store engine
pub trait FileSystemAbstraction: Send + Sync + fmt::Debug {
    /// Open a file
    fn open(&self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StoreFile>>;

    /// Create a single directory; its parent must exist and it must not
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Create a directory and all missing parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// List the direct children of a directory, sorted by path
    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Whether anything exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Whether `path` is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Size of a file in bytes
    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Rename a file or directory; fails with `CrossesDevices` across volumes
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Delete a single file
    fn delete_file(&self, path: &Path) -> io::Result<()>;

    /// Delete a directory tree; deleting a missing path is not an error
    fn delete_recursively(&self, path: &Path) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(fs: &dyn FileSystemAbstraction, root: &Path) {
        let path = root.join("data.bin");
        {
            let file = fs.open(&path, OpenMode::Truncate).unwrap();
            file.write_at(0, b"hello").unwrap();
            file.write_at(8, b"world").unwrap();
            assert_eq!(file.len().unwrap(), 13);

            let mut gap = [0xffu8; 3];
            file.read_at(5, &mut gap).unwrap();
            assert_eq!(gap, [0, 0, 0]);

            file.append(b"!").unwrap();
            assert_eq!(file.read_all().unwrap(), b"hello\0\0\0world!");
        }

        let reader = fs.open(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 4];
        let err = reader.read_at(12, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(reader.write_at(0, b"x").is_err());

        assert!(fs.exists(&path));
        assert!(!fs.is_dir(&path));
        assert_eq!(fs.file_size(&path).unwrap(), 14);

        let moved = root.join("moved.bin");
        fs.rename(&path, &moved).unwrap();
        assert!(!fs.exists(&path));
        assert_eq!(fs.file_size(&moved).unwrap(), 14);

        fs.delete_file(&moved).unwrap();
        assert!(!fs.exists(&moved));
    }

    #[test]
    fn test_disk_file_system() {
        let dir = tempfile::TempDir::new().unwrap();
        exercise(&DefaultFileSystem, dir.path());
    }

    #[test]
    fn test_ephemeral_file_system() {
        let fs = EphemeralFileSystem::new();
        let root = Path::new("/db");
        fs.create_dir_all(root).unwrap();
        exercise(&fs, root);
    }

    #[test]
    fn test_open_missing_for_read_fails() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/db")).unwrap();
        let err = fs.open(Path::new("/db/missing"), OpenMode::Read).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
