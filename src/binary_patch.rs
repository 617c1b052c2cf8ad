use crate::error::{Error, Result};
use crate::patch_format::DiffBlock;

/// Replay a delta against the old file contents.
///
/// Each control adds `diff_len` diff bytes to the old bytes at the current old position
/// (wrapping; old bytes past either end count as zero), appends `extra_len` bytes from
/// the extra block, then moves the old position by `seek`.
pub fn apply_delta(old: &[u8], block: &DiffBlock) -> Result<Vec<u8>> {
    let new_length = usize::try_from(block.new_length)
        .map_err(|_| Error::InvalidArchive(format!("new length {} too large", block.new_length)))?;
    // Every output byte comes from either the diff or the extra block.
    let available = block.diff.len() + block.extra.len();
    if new_length > available {
        return Err(Error::InvalidArchive(format!(
            "new length {new_length} exceeds the {available} bytes the delta carries"
        )));
    }
    let mut new = Vec::with_capacity(new_length);

    let mut old_pos: i64 = 0;
    let mut diff_ptr = 0usize;
    let mut extra_ptr = 0usize;

    for (i, control) in block.controls.iter().enumerate() {
        let diff_len = control.diff_len as usize;
        let extra_len = control.extra_len as usize;

        if new.len() + diff_len > new_length || diff_ptr + diff_len > block.diff.len() {
            return Err(Error::InvalidArchive(format!(
                "diff overflow at control {i}: {diff_len} bytes at output {} / diff {diff_ptr}",
                new.len()
            )));
        }
        for (j, delta) in block.diff[diff_ptr..diff_ptr + diff_len].iter().enumerate() {
            let base = old_pos
                .checked_add(j as i64)
                .and_then(|p| usize::try_from(p).ok())
                .and_then(|p| old.get(p))
                .copied()
                .unwrap_or(0);
            new.push(base.wrapping_add(*delta));
        }
        diff_ptr += diff_len;

        if new.len() + extra_len > new_length || extra_ptr + extra_len > block.extra.len() {
            return Err(Error::InvalidArchive(format!(
                "extra overflow at control {i}: {extra_len} bytes at output {} / extra {extra_ptr}",
                new.len()
            )));
        }
        new.extend_from_slice(&block.extra[extra_ptr..extra_ptr + extra_len]);
        extra_ptr += extra_len;

        old_pos = old_pos
            .checked_add(diff_len as i64)
            .and_then(|p| p.checked_add(control.seek))
            .ok_or_else(|| Error::InvalidArchive(format!("seek overflow at control {i}")))?;
    }

    if new.len() != new_length {
        return Err(Error::InvalidArchive(format!(
            "delta produced {} bytes, expected {new_length}",
            new.len()
        )));
    }

    Ok(new)
}
