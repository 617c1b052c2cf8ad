use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use log::{debug, info, warn};

use crate::archive::{ArchiveEntry, ArchiveReader, EntryKind};
use crate::binary_patch;
use crate::checksum;
use crate::error::{Error, IoResultExt, Result};
use crate::patch_format::{
    archive_path, ApplySummary, ControlSum, DiffBlock, COPY_CHUNK_SIZE, PATCHES_PREFIX,
    PLAIN_PREFIX,
};
use crate::progress::{ProgressObserver, Stage};
use crate::util;

/// Apply the archive at `archive` to `old_dir`, writing the result into `dest_dir`.
///
/// `dest_dir` should be empty or missing. Nothing under it is cleaned up on failure;
/// callers discard it. The archive's format version is checked before any file is
/// written.
pub fn apply_patch(
    archive: &Path,
    old_dir: &Path,
    dest_dir: &Path,
    observer: &mut dyn ProgressObserver,
) -> Result<ApplySummary> {
    let reader = ArchiveReader::open(archive)?;
    let info = reader.read_info()?;
    let mut summary = ApplySummary::default();

    // Stage 1: every file of the base tree is patched or copied through.
    let total = util::count_files(old_dir)?;
    info!("patching {total} files from {}", old_dir.display());
    observer.on_stage(Stage::Patch, total);

    let mut index = 0;
    for old_sub in util::walk_dirs(old_dir)? {
        let sub = util::relative_path(old_dir, &old_sub)?;
        let dest_sub = dest_dir.join(&sub);
        fs::create_dir_all(&dest_sub).at(&dest_sub)?;

        for child in util::list_children(&old_sub)?.into_iter().filter(|c| !c.is_dir) {
            let relative = if sub.is_empty() {
                child.name.clone()
            } else {
                format!("{sub}/{}", child.name)
            };
            let dest = dest_sub.join(&child.name);

            match info.control_sum(&relative) {
                Some(sums) => {
                    patch_file(&reader, &relative, &child.path, &dest, sums)?;
                    summary.files_patched += 1;
                }
                None => {
                    fs::copy(&child.path, &dest).at(&child.path)?;
                    debug!("copied untouched file {relative}");
                    summary.files_copied += 1;
                }
            }

            index += 1;
            observer.on_progress(index);
        }
    }

    // Stage 2: content that did not exist in the base tree.
    let plain: Vec<(&str, &ArchiveEntry)> = reader.under_prefix(PLAIN_PREFIX).collect();
    info!("extracting {} new entries", plain.len());
    observer.on_stage(Stage::Plain, plain.len());

    for (i, (relative, entry)) in plain.iter().enumerate() {
        let dest = join_entry_path(dest_dir, relative)?;
        match entry.kind {
            EntryKind::Dir => {
                clear_conflict(&dest, EntryKind::Dir)?;
                fs::create_dir_all(&dest).at(&dest)?;
                summary.plain_dirs += 1;
            }
            EntryKind::File => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).at(parent)?;
                }
                clear_conflict(&dest, EntryKind::File)?;
                extract_file(&reader, entry, &dest)?;
                summary.plain_files += 1;
            }
        }
        observer.on_progress(i + 1);
    }

    Ok(summary)
}

fn patch_file(
    reader: &ArchiveReader,
    relative: &str,
    old_path: &Path,
    dest: &Path,
    sums: &ControlSum,
) -> Result<()> {
    let old_data = util::map_file(old_path)?;
    if checksum::digest_bytes(&old_data) != sums.before {
        return Err(Error::InvalidOriginalFile(relative.to_string()));
    }

    let entry = reader
        .entry(&archive_path(PATCHES_PREFIX, relative))
        .ok_or_else(|| Error::InvalidArchive(format!("no delta stored for {relative}")))?;

    let new_data = DiffBlock::decode(reader.contents(entry))
        .and_then(|block| binary_patch::apply_delta(&old_data, &block))
        .map_err(|err| {
            warn!("cannot replay delta for {relative}: {err}");
            Error::InvalidResultingFile(relative.to_string())
        })?;
    drop(old_data);

    fs::write(dest, &new_data).at(dest)?;
    util::set_mode(dest, entry.meta.mode)?;

    if checksum::digest_file(dest)? != sums.after {
        return Err(Error::InvalidResultingFile(relative.to_string()));
    }
    debug!("patched {relative}");
    Ok(())
}

fn extract_file(reader: &ArchiveReader, entry: &ArchiveEntry, dest: &Path) -> Result<()> {
    let mut out = BufWriter::new(File::create(dest).at(dest)?);
    for chunk in reader.contents(entry).chunks(COPY_CHUNK_SIZE) {
        out.write_all(chunk).at(dest)?;
    }
    out.flush().at(dest)?;
    drop(out);
    util::set_mode(dest, entry.meta.mode)
}

/// Join an archive-relative path onto `root`, refusing anything that would leave it.
fn join_entry_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let mut path = root.to_path_buf();
    for part in relative.split('/') {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => path.push(name),
            _ => {
                return Err(Error::InvalidArchive(format!(
                    "unsafe entry path: {relative:?}"
                )))
            }
        }
    }
    Ok(path)
}

/// A plain entry replaces whatever of the other kind sits at its path.
fn clear_conflict(path: &Path, wanted: EntryKind) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    match wanted {
        EntryKind::Dir if !meta.is_dir() => {
            debug!("replacing file with directory: {}", path.display());
            fs::remove_file(path).at(path)
        }
        EntryKind::File if meta.is_dir() => {
            debug!("replacing directory with file: {}", path.display());
            fs::remove_dir_all(path).at(path)
        }
        _ => Ok(()),
    }
}
