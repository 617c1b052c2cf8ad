use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, info};
use rayon::prelude::*;

use crate::archive::ArchiveWriter;
use crate::binary_diff;
use crate::checksum;
use crate::error::{IoResultExt, Result};
use crate::patch_format::{
    archive_path, ControlSum, DiffSummary, PatchInfo, INFO_ENTRY, PATCHES_PREFIX, PLAIN_PREFIX,
};
use crate::util::{self, EntryMeta};

/// A delta computed for one file present on both sides.
struct FileDelta {
    relative: String,
    encoded: Vec<u8>,
    meta: EntryMeta,
    sums: ControlSum,
}

/// Build a patch archive at `output` turning `old_dir` into `new_dir`.
///
/// Walks `old_dir` top-down. Files present on both sides become `patches/` deltas;
/// anything only present in `new_dir` is stored under `plain/`. Directories that
/// vanished from `new_dir` are skipped and removed files are never recorded, so
/// applying the archive keeps them.
pub fn create_patch(old_dir: &Path, new_dir: &Path, output: &Path) -> Result<DiffSummary> {
    let mut writer = ArchiveWriter::create(output)?;
    let mut info = PatchInfo::new();
    let mut summary = DiffSummary::default();

    for old_sub in util::walk_dirs(old_dir)? {
        let sub = util::relative_path(old_dir, &old_sub)?;
        let new_sub = new_dir.join(&sub);
        if !new_sub.is_dir() {
            debug!("skipping directory absent from the new tree: {sub:?}");
            summary.dirs_skipped += 1;
            continue;
        }

        let old_children = util::list_children(&old_sub)?;
        let new_children = util::list_children(&new_sub)?;
        let old_files: HashSet<&str> = old_children
            .iter()
            .filter(|c| !c.is_dir)
            .map(|c| c.name.as_str())
            .collect();
        let old_dirs: HashSet<&str> = old_children
            .iter()
            .filter(|c| c.is_dir)
            .map(|c| c.name.as_str())
            .collect();

        // Pairs of files present on both sides, diffed in parallel, stored in name order.
        let pairs: Vec<(String, PathBuf, PathBuf)> = old_children
            .iter()
            .filter(|c| !c.is_dir)
            .map(|c| (join_relative(&sub, &c.name), c.path.clone(), new_sub.join(&c.name)))
            .filter(|(_, _, new_path)| new_path.is_file())
            .collect();

        let deltas = pairs
            .par_iter()
            .map(|(relative, old_path, new_path)| diff_file(relative, old_path, new_path))
            .collect::<Result<Vec<_>>>()?;

        for delta in deltas {
            writer.append_bytes(
                &archive_path(PATCHES_PREFIX, &delta.relative),
                delta.meta,
                &delta.encoded,
            )?;
            info.control_sums.insert(delta.relative, delta.sums);
            summary.files_patched += 1;
        }

        for child in &new_children {
            let relative = join_relative(&sub, &child.name);
            if child.is_dir {
                if !old_dirs.contains(child.name.as_str()) {
                    add_plain_dir(&mut writer, &child.path, &relative, &mut summary)?;
                }
            } else if !old_files.contains(child.name.as_str()) {
                add_plain_file(&mut writer, &child.path, &relative)?;
                summary.plain_files += 1;
            }
        }
    }

    writer.append_bytes(INFO_ENTRY, info_meta(), &info.encode()?)?;
    writer.finish()?;

    info!(
        "created {}: {} patched, {} plain files, {} plain directories",
        output.display(),
        summary.files_patched,
        summary.plain_files,
        summary.plain_dirs
    );
    Ok(summary)
}

fn diff_file(relative: &str, old_path: &Path, new_path: &Path) -> Result<FileDelta> {
    let old_data = util::map_file(old_path)?;
    let new_data = util::map_file(new_path)?;
    let block = binary_diff::compute_delta(&old_data, &new_data);
    let meta = EntryMeta::of(&std::fs::metadata(new_path).at(new_path)?);
    debug!(
        "diffed {relative}: {} controls, {} extra bytes",
        block.controls.len(),
        block.extra.len()
    );

    Ok(FileDelta {
        relative: relative.to_string(),
        encoded: block.encode(),
        meta,
        sums: ControlSum {
            before: checksum::digest_bytes(&old_data),
            after: checksum::digest_bytes(&new_data),
        },
    })
}

fn add_plain_file(writer: &mut ArchiveWriter, path: &Path, relative: &str) -> Result<()> {
    let file = File::open(path).at(path)?;
    let metadata = file.metadata().at(path)?;
    writer.append_file(
        &archive_path(PLAIN_PREFIX, relative),
        EntryMeta::of(&metadata),
        metadata.len(),
        BufReader::new(file),
    )?;
    debug!("stored new file {relative}");
    Ok(())
}

/// Store a directory that only exists in the new tree, with everything below it.
fn add_plain_dir(
    writer: &mut ArchiveWriter,
    path: &Path,
    relative: &str,
    summary: &mut DiffSummary,
) -> Result<()> {
    let metadata = std::fs::metadata(path).at(path)?;
    writer.append_dir(&archive_path(PLAIN_PREFIX, relative), EntryMeta::of(&metadata))?;
    summary.plain_dirs += 1;

    for child in util::list_children(path)? {
        let child_relative = join_relative(relative, &child.name);
        if child.is_dir {
            add_plain_dir(writer, &child.path, &child_relative, summary)?;
        } else {
            add_plain_file(writer, &child.path, &child_relative)?;
            summary.plain_files += 1;
        }
    }
    Ok(())
}

fn join_relative(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

fn info_meta() -> EntryMeta {
    EntryMeta {
        mode: 0o644,
        mtime: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveReader, EntryKind};
    use std::fs;

    fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
        for (relative, content) in files {
            let full = root.join(relative);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
    }

    fn entry_names(reader: &ArchiveReader) -> Vec<String> {
        reader.entries().iter().map(|e| e.name.clone()).collect()
    }

    #[test]
    fn test_entries_for_changed_added_and_removed_files() {
        let temp = tempfile::tempdir().unwrap();
        let old = temp.path().join("old");
        let new = temp.path().join("new");
        write_tree(&old, &[("a.txt", b"hello"), ("b.txt", b"world")]);
        write_tree(&new, &[("a.txt", b"hello!"), ("c.txt", b"new")]);

        let output = temp.path().join("out.patch");
        let summary = create_patch(&old, &new, &output).unwrap();
        assert_eq!(summary.files_patched, 1);
        assert_eq!(summary.plain_files, 1);

        let reader = ArchiveReader::open(&output).unwrap();
        assert_eq!(
            entry_names(&reader),
            vec!["patches/a.txt", "plain/c.txt", "info"]
        );
        let info = reader.read_info().unwrap();
        assert_eq!(info.control_sums.len(), 1);
        assert!(info.control_sum("a.txt").is_some());
        assert!(info.control_sum("b.txt").is_none());
    }

    #[test]
    fn test_new_directories_are_stored_recursively() {
        let temp = tempfile::tempdir().unwrap();
        let old = temp.path().join("old");
        let new = temp.path().join("new");
        write_tree(&old, &[("keep/x", b"x"), ("gone/y", b"y")]);
        write_tree(&new, &[("keep/x", b"x"), ("fresh/sub/z", b"z")]);
        fs::create_dir_all(new.join("fresh/empty")).unwrap();

        let output = temp.path().join("out.patch");
        let summary = create_patch(&old, &new, &output).unwrap();
        assert_eq!(summary.dirs_skipped, 1);
        assert_eq!(summary.plain_dirs, 3);

        let reader = ArchiveReader::open(&output).unwrap();
        let plain: Vec<_> = reader
            .under_prefix(PLAIN_PREFIX)
            .map(|(rel, e)| (rel.to_string(), e.kind))
            .collect();
        assert_eq!(
            plain,
            vec![
                ("fresh".to_string(), EntryKind::Dir),
                ("fresh/empty".to_string(), EntryKind::Dir),
                ("fresh/sub".to_string(), EntryKind::Dir),
                ("fresh/sub/z".to_string(), EntryKind::File),
            ]
        );
        assert!(reader.entry("patches/keep/x").is_some());
        assert!(!entry_names(&reader).iter().any(|n| n.contains("gone")));
    }

    #[test]
    fn test_same_input_same_archive() {
        let temp = tempfile::tempdir().unwrap();
        let old = temp.path().join("old");
        let new = temp.path().join("new");
        let big: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
        let mut big_new = big.clone();
        big_new[20_000] ^= 0xFF;
        write_tree(&old, &[("d/big.bin", &big), ("d/small", b"1"), ("e", b"e")]);
        write_tree(&new, &[("d/big.bin", &big_new), ("d/small", b"2"), ("f", b"f")]);

        let first = temp.path().join("1.patch");
        let second = temp.path().join("2.patch");
        create_patch(&old, &new, &first).unwrap();
        create_patch(&old, &new, &second).unwrap();
        assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
    }
}
