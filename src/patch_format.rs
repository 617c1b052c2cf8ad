use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};

use crate::checksum::Digest;
use crate::error::{Error, Result};

pub const MAGIC: &[u8; 8] = b"UPDELTA1";
pub const FORMAT_VERSION: u32 = 1;

pub const INFO_ENTRY: &str = "info";
pub const PATCHES_PREFIX: &str = "patches";
pub const PLAIN_PREFIX: &str = "plain";

pub const ZSTD_LEVEL: i32 = 3;
/// Chunk size used when streaming plain entries out of the archive.
pub const COPY_CHUNK_SIZE: usize = 16 * 1024;
pub const HASH_BUFFER_SIZE: usize = 256 * 1024;

/// Size of one encoded control instruction: three little-endian 64-bit words.
const CONTROL_WIDTH: usize = 24;

/// Digests of a patched file before and after the delta is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSum {
    pub before: Digest,
    pub after: Digest,
}

/// Contents of the `info` entry. `format_version` must stay the first field: readers
/// decode it on its own before trusting the rest of the layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchInfo {
    pub format_version: u32,
    pub control_sums: BTreeMap<String, ControlSum>,
}

impl PatchInfo {
    pub fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            control_sums: BTreeMap::new(),
        }
    }

    pub fn control_sum(&self, path: &str) -> Option<&ControlSum> {
        self.control_sums.get(path)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode an `info` entry, rejecting other format versions before the body is read.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let found: u32 = bincode::deserialize(data)?;
        if found != FORMAT_VERSION {
            return Err(Error::IncompatiblePatchFormat {
                found,
                expected: FORMAT_VERSION,
            });
        }
        Ok(bincode::deserialize(data)?)
    }
}

impl Default for PatchInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// One replay instruction: combine `diff_len` bytes of the diff block with the old file
/// at the current old position, append `extra_len` literal bytes from the extra block,
/// then move the old position by `seek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub diff_len: u64,
    pub extra_len: u64,
    pub seek: i64,
}

/// A self-contained delta for one file: the control/diff/extra triple.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiffBlock {
    pub new_length: u64,
    pub controls: Vec<Control>,
    pub diff: Vec<u8>,
    pub extra: Vec<u8>,
}

impl DiffBlock {
    /// Wire layout: `i64 new_length`, then `control`, `diff` and `extra`, each prefixed
    /// by its `i64` byte length. All integers little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let control_len = self.controls.len() * CONTROL_WIDTH;
        let mut out =
            Vec::with_capacity(32 + control_len + self.diff.len() + self.extra.len());

        out.extend_from_slice(&(self.new_length as i64).to_le_bytes());
        out.extend_from_slice(&(control_len as i64).to_le_bytes());
        for control in &self.controls {
            out.extend_from_slice(&control.diff_len.to_le_bytes());
            out.extend_from_slice(&control.extra_len.to_le_bytes());
            out.extend_from_slice(&control.seek.to_le_bytes());
        }
        out.extend_from_slice(&(self.diff.len() as i64).to_le_bytes());
        out.extend_from_slice(&self.diff);
        out.extend_from_slice(&(self.extra.len() as i64).to_le_bytes());
        out.extend_from_slice(&self.extra);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let new_length = read_length(&mut cursor, "new length")?;
        let control_block = read_block(&mut cursor, "control")?;
        if control_block.len() % CONTROL_WIDTH != 0 {
            return Err(Error::InvalidArchive(format!(
                "control block of {} bytes is not a whole number of instructions",
                control_block.len()
            )));
        }
        let mut controls = Vec::with_capacity(control_block.len() / CONTROL_WIDTH);
        let mut control_cursor = Cursor::new(control_block.as_slice());
        for _ in 0..control_block.len() / CONTROL_WIDTH {
            controls.push(Control {
                diff_len: control_cursor.read_u64::<LittleEndian>().map_err(truncated)?,
                extra_len: control_cursor.read_u64::<LittleEndian>().map_err(truncated)?,
                seek: control_cursor.read_i64::<LittleEndian>().map_err(truncated)?,
            });
        }
        let diff = read_block(&mut cursor, "diff")?;
        let extra = read_block(&mut cursor, "extra")?;

        if (cursor.position() as usize) != data.len() {
            return Err(Error::InvalidArchive(format!(
                "{} trailing bytes after delta",
                data.len() - cursor.position() as usize
            )));
        }

        Ok(DiffBlock {
            new_length,
            controls,
            diff,
            extra,
        })
    }
}

fn truncated(_: std::io::Error) -> Error {
    Error::InvalidArchive("truncated delta".to_string())
}

fn read_length(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<u64> {
    let value = cursor.read_i64::<LittleEndian>().map_err(truncated)?;
    u64::try_from(value)
        .map_err(|_| Error::InvalidArchive(format!("negative {what} in delta: {value}")))
}

fn read_block(cursor: &mut Cursor<&[u8]>, what: &str) -> Result<Vec<u8>> {
    let len = read_length(cursor, what)?;
    let remaining = cursor.get_ref().len() as u64 - cursor.position();
    if len > remaining {
        return Err(Error::InvalidArchive(format!(
            "{what} block claims {len} bytes, only {remaining} left"
        )));
    }
    let mut block = vec![0u8; len as usize];
    cursor.read_exact(&mut block).map_err(truncated)?;
    Ok(block)
}

/// Build an archive entry name from a prefix and a relative path. Backslashes and
/// repeated separators collapse into single `/`.
pub fn archive_path(prefix: &str, relative: &str) -> String {
    prefix
        .split(['/', '\\'])
        .chain(relative.split(['/', '\\']))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Counters reported after building an archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiffSummary {
    pub files_patched: usize,
    pub plain_files: usize,
    pub plain_dirs: usize,
    pub dirs_skipped: usize,
}

/// Counters reported after applying an archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub files_patched: usize,
    pub files_copied: usize,
    pub plain_files: usize,
    pub plain_dirs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::digest_bytes;

    fn sample_block() -> DiffBlock {
        DiffBlock {
            new_length: 9,
            controls: vec![
                Control {
                    diff_len: 4,
                    extra_len: 2,
                    seek: -3,
                },
                Control {
                    diff_len: 3,
                    extra_len: 0,
                    seek: 0,
                },
            ],
            diff: vec![0, 0, 1, 0, 0, 0, 0],
            extra: b"xy".to_vec(),
        }
    }

    #[test]
    fn test_diff_block_layout() {
        let encoded = sample_block().encode();
        assert_eq!(&encoded[..8], &9i64.to_le_bytes());
        assert_eq!(&encoded[8..16], &48i64.to_le_bytes());
        // second word of the first instruction
        assert_eq!(&encoded[24..32], &2u64.to_le_bytes());
        assert_eq!(&encoded[32..40], &(-3i64).to_le_bytes());
        assert_eq!(encoded.len(), 8 + 8 + 48 + 8 + 7 + 8 + 2);
        assert_eq!(DiffBlock::decode(&encoded).unwrap(), sample_block());
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        let encoded = sample_block().encode();
        assert!(DiffBlock::decode(&encoded[..encoded.len() - 1]).is_err());

        let mut bad_control = encoded.clone();
        bad_control[8..16].copy_from_slice(&47i64.to_le_bytes());
        assert!(DiffBlock::decode(&bad_control).is_err());

        let mut negative = encoded.clone();
        negative[..8].copy_from_slice(&(-1i64).to_le_bytes());
        assert!(DiffBlock::decode(&negative).is_err());

        let mut trailing = encoded;
        trailing.push(0);
        assert!(DiffBlock::decode(&trailing).is_err());
    }

    #[test]
    fn test_info_version_gate() {
        let mut info = PatchInfo::new();
        info.control_sums.insert(
            "a.txt".to_string(),
            ControlSum {
                before: digest_bytes(b"hello"),
                after: digest_bytes(b"hello!"),
            },
        );
        let decoded = PatchInfo::decode(&info.encode().unwrap()).unwrap();
        assert_eq!(decoded, info);
        assert!(decoded.control_sum("a.txt").is_some());
        assert!(decoded.control_sum("b.txt").is_none());

        info.format_version = FORMAT_VERSION + 1;
        let err = PatchInfo::decode(&info.encode().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            Error::IncompatiblePatchFormat { found, expected }
                if found == FORMAT_VERSION + 1 && expected == FORMAT_VERSION
        ));
    }

    #[test]
    fn test_archive_path() {
        assert_eq!(archive_path("a", r"b\\c\d/e"), "a/b/c/d/e");
        assert_eq!(archive_path(PLAIN_PREFIX, "dir//file"), "plain/dir/file");
        assert_eq!(archive_path(PATCHES_PREFIX, ""), "patches");
    }
}
