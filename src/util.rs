use std::fs::{File, Metadata};
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use memmap2::Mmap;
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};

/// Read-only contents of a file: memory-mapped, or empty for zero-length files
/// (which cannot be mapped on every platform).
pub enum FileData {
    Mapped(Mmap),
    Empty,
}

impl Deref for FileData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            FileData::Mapped(map) => map,
            FileData::Empty => &[],
        }
    }
}

/// Memory-map a file for read-only access.
///
/// Callers must not truncate or replace the file while the mapping is live.
pub fn map_file(path: &Path) -> Result<FileData> {
    let file = File::open(path).at(path)?;
    map_open_file(&file, path)
}

pub fn map_open_file(file: &File, path: &Path) -> Result<FileData> {
    let len = file.metadata().at(path)?.len();
    if len == 0 {
        return Ok(FileData::Empty);
    }
    // SAFETY: read-only mapping; the engine never writes to files it is reading.
    let map = unsafe { Mmap::map(file) }.at(path)?;
    Ok(FileData::Mapped(map))
}

/// Permission bits and modification time stored with every archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub mode: u32,
    pub mtime: u64,
}

impl EntryMeta {
    pub fn of(meta: &Metadata) -> Self {
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        Self {
            mode: mode_of(meta),
            mtime,
        }
    }
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    match (meta.is_dir(), meta.permissions().readonly()) {
        (true, _) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    }
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).at(path)
}

#[cfg(not(unix))]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    let mut perms = std::fs::metadata(path).at(path)?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    std::fs::set_permissions(path, perms).at(path)
}

/// Path of `path` below `root`, with `/` separators regardless of host OS.
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| Error::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "path escapes the tree root"),
    })?;
    let relative = relative.to_str().ok_or_else(|| Error::Io {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 path"),
    })?;
    Ok(relative.replace('\\', "/"))
}

fn walk_error(err: walkdir::Error, root: &Path) -> Error {
    let path = err.path().unwrap_or(root).to_path_buf();
    Error::Io {
        path,
        source: io::Error::from(err),
    }
}

#[derive(Debug, Clone)]
pub struct Child {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// Immediate children of `dir`, sorted by name.
pub fn list_children(dir: &Path) -> Result<Vec<Child>> {
    let mut children = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| walk_error(e, dir))?;
        let name = relative_path(dir, entry.path())?;
        children.push(Child {
            name,
            path: entry.path().to_path_buf(),
            is_dir: entry.file_type().is_dir(),
        });
    }
    Ok(children)
}

/// Every directory under `root` (including `root` itself), parents first, siblings sorted.
pub fn walk_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(e, root))?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    Ok(dirs)
}

pub fn count_files(root: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| walk_error(e, root))?;
        if !entry.file_type().is_dir() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_walk_order_and_children() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("b/inner")).unwrap();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("z.txt"), b"z").unwrap();
        fs::write(root.join("a/one"), b"1").unwrap();
        fs::write(root.join("b/inner/two"), b"2").unwrap();

        let dirs: Vec<String> = walk_dirs(root)
            .unwrap()
            .iter()
            .map(|d| relative_path(root, d).unwrap())
            .collect();
        assert_eq!(dirs, vec!["", "a", "b", "b/inner"]);

        let children = list_children(root).unwrap();
        let names: Vec<_> = children.iter().map(|c| (c.name.as_str(), c.is_dir)).collect();
        assert_eq!(names, vec![("a", true), ("b", true), ("z.txt", false)]);

        assert_eq!(count_files(root).unwrap(), 3);
    }

    #[test]
    fn test_map_empty_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, b"").unwrap();
        assert!(map_file(&path).unwrap().is_empty());

        fs::write(&path, b"data").unwrap();
        assert_eq!(&*map_file(&path).unwrap(), b"data");
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_round_trip() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("script.sh");
        fs::write(&path, b"#!/bin/sh\n").unwrap();
        set_mode(&path, 0o750).unwrap();
        let meta = EntryMeta::of(&fs::metadata(&path).unwrap());
        assert_eq!(meta.mode, 0o750);
        assert!(meta.mtime > 0);
    }
}
