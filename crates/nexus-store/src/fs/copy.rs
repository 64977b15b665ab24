//! Copy helpers shared by migration and tooling

use super::{FileSystemAbstraction, OpenMode};
use std::io;
use std::path::{Path, PathBuf};

const COPY_CHUNK: usize = 64 * 1024;

/// Copy one file, replacing `to` if it exists. Returns the bytes copied.
pub fn copy_file<F>(fs: &F, from: &Path, to: &Path) -> io::Result<u64>
where
    F: FileSystemAbstraction + ?Sized,
{
    let source = fs.open(from, OpenMode::Read)?;
    let target = fs.open(to, OpenMode::Truncate)?;
    let len = source.len()?;
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut offset = 0u64;
    while offset < len {
        let chunk = (len - offset).min(COPY_CHUNK as u64) as usize;
        source.read_at(offset, &mut buf[..chunk])?;
        target.write_at(offset, &buf[..chunk])?;
        offset += chunk as u64;
    }
    target.sync()?;
    Ok(len)
}

/// Copy a directory tree. `to` must not exist yet; every subdirectory is
/// created before its contents are copied.
///
/// Walks with an explicit work list so deep trees cannot exhaust the stack.
pub fn copy_recursively<F>(fs: &F, from: &Path, to: &Path) -> io::Result<u64>
where
    F: FileSystemAbstraction + ?Sized,
{
    if !fs.is_dir(from) {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", from.display()),
        ));
    }

    let mut copied = 0u64;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        fs.create_dir(&dst)?;
        for entry in fs.list_dir(&src)? {
            let Some(name) = entry.file_name() else {
                continue;
            };
            let target = dst.join(name);
            if entry.is_dir {
                pending.push((entry.path, target));
            } else {
                copied += copy_file(fs, &entry.path, &target)?;
            }
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{DefaultFileSystem, EphemeralFileSystem};

    fn build_tree(fs: &dyn FileSystemAbstraction, root: &Path) {
        fs.create_dir_all(&root.join("a/b/c")).unwrap();
        fs.create_dir_all(&root.join("empty")).unwrap();
        fs.open(&root.join("top"), OpenMode::Truncate)
            .unwrap()
            .write_at(0, b"top")
            .unwrap();
        let big = vec![7u8; COPY_CHUNK * 2 + 17];
        fs.open(&root.join("a/b/c/deep"), OpenMode::Truncate)
            .unwrap()
            .write_at(0, &big)
            .unwrap();
    }

    fn check_tree(fs: &dyn FileSystemAbstraction, root: &Path) {
        assert!(fs.is_dir(&root.join("empty")));
        assert_eq!(
            fs.open(&root.join("top"), OpenMode::Read)
                .unwrap()
                .read_all()
                .unwrap(),
            b"top"
        );
        let deep = fs
            .open(&root.join("a/b/c/deep"), OpenMode::Read)
            .unwrap()
            .read_all()
            .unwrap();
        assert_eq!(deep.len(), COPY_CHUNK * 2 + 17);
        assert!(deep.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_copy_nested_tree_ephemeral() {
        let fs = EphemeralFileSystem::new();
        build_tree(&fs, Path::new("/src"));
        let copied = copy_recursively(&fs, Path::new("/src"), Path::new("/dst")).unwrap();
        assert_eq!(copied, 3 + (COPY_CHUNK * 2 + 17) as u64);
        check_tree(&fs, Path::new("/dst"));
        check_tree(&fs, Path::new("/src"));
    }

    #[test]
    fn test_copy_nested_tree_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let fs = DefaultFileSystem;
        let src = dir.path().join("src");
        build_tree(&fs, &src);
        copy_recursively(&fs, &src, &dir.path().join("dst")).unwrap();
        check_tree(&fs, &dir.path().join("dst"));
    }

    #[test]
    fn test_copy_into_existing_fails() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/src")).unwrap();
        fs.create_dir_all(Path::new("/dst")).unwrap();
        let err = copy_recursively(&fs, Path::new("/src"), Path::new("/dst")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_copy_missing_source() {
        let fs = EphemeralFileSystem::new();
        assert!(copy_recursively(&fs, Path::new("/nope"), Path::new("/dst")).is_err());
    }
}
