//! Multi-hop upgrades: apply several archives in sequence without touching the
//! installed tree until the final result is ready.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::apply::apply_patch;
use crate::error::{IoResultExt, Result};
use crate::progress::ProgressObserver;

/// Apply `archives` in order starting from `base_dir`.
///
/// Hop 0 writes into a first scratch directory; later hops alternate between two
/// scratch directories created next to `base_dir`. Returns the directory holding the
/// final tree (`None` when `archives` is empty). `base_dir` itself is never modified.
/// If a hop fails, both scratch directories are removed before the error is returned.
/// `base_dir` is canonicalized first, so `.` and `..` resolve to real siblings.
pub fn apply_chain(
    archives: &[PathBuf],
    base_dir: &Path,
    observer: &mut dyn ProgressObserver,
) -> Result<Option<PathBuf>> {
    if archives.is_empty() {
        return Ok(None);
    }

    let base_dir = fs::canonicalize(base_dir).at(base_dir)?;
    let base_dir = base_dir.as_path();
    let first = scratch_sibling(base_dir)?;
    fs::create_dir(&first).at(&first)?;
    let second = if archives.len() > 1 {
        let dir = scratch_sibling(base_dir)?;
        fs::create_dir(&dir).at(&dir)?;
        Some(dir)
    } else {
        None
    };

    let result = run_hops(archives, base_dir, &first, second.as_deref(), observer);
    match result {
        Ok(final_dir) => {
            // The scratch directory not holding the result is an intermediate.
            for dir in [Some(first.as_path()), second.as_deref()].into_iter().flatten() {
                if dir != final_dir.as_path() {
                    remove_scratch(dir);
                }
            }
            Ok(Some(final_dir))
        }
        Err(err) => {
            remove_scratch(&first);
            if let Some(dir) = &second {
                remove_scratch(dir);
            }
            Err(err)
        }
    }
}

fn run_hops(
    archives: &[PathBuf],
    base_dir: &Path,
    first: &Path,
    second: Option<&Path>,
    observer: &mut dyn ProgressObserver,
) -> Result<PathBuf> {
    let total = archives.len();
    let mut source = base_dir.to_path_buf();
    let mut dest = first.to_path_buf();

    for (index, archive) in archives.iter().enumerate() {
        if index == 1 {
            source = first.to_path_buf();
            dest = second.unwrap_or(first).to_path_buf();
        } else if index > 1 {
            std::mem::swap(&mut source, &mut dest);
            reset_dir(&dest)?;
        }

        info!(
            "applying {} ({}/{total}): {} -> {}",
            archive.display(),
            index + 1,
            source.display(),
            dest.display()
        );
        observer.on_archive(index, total, archive);
        apply_patch(archive, &source, &dest, observer)?;
    }

    Ok(dest)
}

/// Replace `target` with the tree at `result`.
pub fn install(result: &Path, target: &Path) -> Result<()> {
    let target = if target.exists() {
        let target = fs::canonicalize(target).at(target)?;
        fs::remove_dir_all(&target).at(&target)?;
        target
    } else {
        target.to_path_buf()
    };
    fs::rename(result, &target).at(result)?;
    info!("installed {} over {}", result.display(), target.display());
    Ok(())
}

/// A free sibling path of `dir`, named by appending underscores.
fn scratch_sibling(dir: &Path) -> Result<PathBuf> {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "update".into());
    loop {
        name.push("_");
        let candidate = dir.with_file_name(&name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).at(dir)?;
    }
    fs::create_dir(dir).at(dir)
}

fn remove_scratch(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir) {
        warn!("failed to remove scratch directory {}: {err}", dir.display());
    }
}
