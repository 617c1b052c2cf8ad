//! The patch container: an 8-byte magic header followed by a zstd-compressed tar.
//!
//! Entry names always use `/`. Readers decompress the tar once into an anonymous
//! temporary file and map it, so entries can be looked up by name in any order.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::patch_format::{PatchInfo, INFO_ENTRY, MAGIC, ZSTD_LEVEL};
use crate::util::{self, EntryMeta, FileData};

pub struct ArchiveWriter {
    builder: tar::Builder<zstd::Encoder<'static, BufWriter<File>>>,
    path: PathBuf,
}

impl ArchiveWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).at(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC).at(path)?;
        let encoder = zstd::Encoder::new(writer, ZSTD_LEVEL).at(path)?;
        Ok(Self {
            builder: tar::Builder::new(encoder),
            path: path.to_path_buf(),
        })
    }

    /// Append a regular file entry, streaming `size` bytes from `data`.
    pub fn append_file<R: Read>(
        &mut self,
        name: &str,
        meta: EntryMeta,
        size: u64,
        data: R,
    ) -> Result<()> {
        let mut header = header_for(tar::EntryType::Regular, meta, size);
        self.builder
            .append_data(&mut header, name, data)
            .at(&self.path)
    }

    pub fn append_bytes(&mut self, name: &str, meta: EntryMeta, data: &[u8]) -> Result<()> {
        self.append_file(name, meta, data.len() as u64, data)
    }

    /// Append a zero-length directory marker.
    pub fn append_dir(&mut self, name: &str, meta: EntryMeta) -> Result<()> {
        let mut header = header_for(tar::EntryType::Directory, meta, 0);
        self.builder
            .append_data(&mut header, name, std::io::empty())
            .at(&self.path)
    }

    pub fn finish(self) -> Result<()> {
        let encoder = self.builder.into_inner().at(&self.path)?;
        let mut writer = encoder.finish().at(&self.path)?;
        writer.flush().at(&self.path)
    }
}

fn header_for(kind: tar::EntryType, meta: EntryMeta, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(size);
    header.set_mode(meta.mode);
    header.set_mtime(meta.mtime);
    header.set_uid(0);
    header.set_gid(0);
    header
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub kind: EntryKind,
    pub meta: EntryMeta,
    offset: usize,
    size: usize,
}

pub struct ArchiveReader {
    data: FileData,
    entries: Vec<ArchiveEntry>,
    index: HashMap<String, usize>,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).at(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; MAGIC.len()];
        reader
            .read_exact(&mut magic)
            .map_err(|_| Error::InvalidArchive(format!("{}: too short", path.display())))?;
        if &magic != MAGIC {
            return Err(Error::InvalidArchive(format!(
                "{}: missing magic header",
                path.display()
            )));
        }

        let mut spool = tempfile::tempfile().at(&std::env::temp_dir())?;
        zstd::stream::copy_decode(reader, &mut spool).map_err(|e| {
            Error::InvalidArchive(format!("{}: decompression failed: {e}", path.display()))
        })?;
        let data = util::map_open_file(&spool, path)?;

        let entries = index_entries(&data)?;
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        debug!("opened {} with {} entries", path.display(), entries.len());

        Ok(Self {
            data,
            entries,
            index,
        })
    }

    /// Entries in archive order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn contents(&self, entry: &ArchiveEntry) -> &[u8] {
        &self.data[entry.offset..entry.offset + entry.size]
    }

    /// Entries under `prefix/`, paired with their path below the prefix.
    pub fn under_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a ArchiveEntry)> + 'a {
        self.entries.iter().filter_map(move |entry| {
            entry
                .name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest, entry))
        })
    }

    pub fn read_info(&self) -> Result<PatchInfo> {
        let entry = self
            .entry(INFO_ENTRY)
            .ok_or_else(|| Error::InvalidArchive("missing info entry".to_string()))?;
        PatchInfo::decode(self.contents(entry))
    }
}

fn index_entries(data: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let bad = |e: std::io::Error| Error::InvalidArchive(format!("corrupt tar stream: {e}"));

    let mut archive = tar::Archive::new(data);
    let mut entries = Vec::new();
    for entry in archive.entries().map_err(bad)? {
        let entry = entry.map_err(bad)?;
        let name = String::from_utf8(entry.path_bytes().into_owned())
            .map_err(|_| Error::InvalidArchive("non-UTF-8 entry name".to_string()))?;
        let name = name.trim_end_matches('/').to_string();

        let header = entry.header();
        let kind = match header.entry_type() {
            t if t.is_dir() => EntryKind::Dir,
            t if t.is_file() || t.is_contiguous() => EntryKind::File,
            other => {
                return Err(Error::InvalidArchive(format!(
                    "unsupported entry type {other:?} for {name}"
                )))
            }
        };
        let meta = EntryMeta {
            mode: header.mode().map_err(bad)?,
            mtime: header.mtime().map_err(bad)?,
        };

        let offset = entry.raw_file_position() as usize;
        let size = entry.size() as usize;
        if offset.checked_add(size).map_or(true, |end| end > data.len()) {
            return Err(Error::InvalidArchive(format!("entry {name} is truncated")));
        }

        entries.push(ArchiveEntry {
            name,
            kind,
            meta,
            offset,
            size,
        });
    }
    Ok(entries)
}
