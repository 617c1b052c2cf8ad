use std::collections::HashMap;

use crate::patch_format::{Control, DiffBlock};
use crate::rolling_hash::WeakHash;

pub const BLOCK_SIZE: usize = 4096;

struct BlockSignature {
    weak: u32,
    strong: blake3::Hash,
    offset: usize,
}

/// A region of the new file: either found in the old file or stored literally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    Copy { offset: usize, len: usize },
    Literal { start: usize, end: usize },
}

/// Compute the delta turning `old` into `new`.
///
/// Matching is rsync-like:
/// 1. Split old data into fixed-size blocks and index them by weak hash
/// 2. Scan new data with a rolling hash, confirming candidates with BLAKE3
/// 3. Extend every confirmed match forward byte by byte
/// 4. Encode matches as diff regions and everything else as extra bytes
pub fn compute_delta(old: &[u8], new: &[u8]) -> DiffBlock {
    let segments = match_segments(old, new);
    encode_segments(old, new, &segments)
}

fn match_segments(old: &[u8], new: &[u8]) -> Vec<Segment> {
    if new.is_empty() {
        return Vec::new();
    }
    if old.is_empty() || new.len() < BLOCK_SIZE {
        return vec![Segment::Literal {
            start: 0,
            end: new.len(),
        }];
    }

    let signatures = build_signatures(old);
    let mut table: HashMap<u32, Vec<usize>> = HashMap::with_capacity(signatures.len());
    for (idx, sig) in signatures.iter().enumerate() {
        table.entry(sig.weak).or_default().push(idx);
    }

    let mut segments = Vec::new();
    let mut literal_start: Option<usize> = None;
    let mut pos = 0usize;
    let mut weak = WeakHash::of(&new[..BLOCK_SIZE]);

    while pos + BLOCK_SIZE <= new.len() {
        let window = &new[pos..pos + BLOCK_SIZE];
        match find_match(weak.value(), window, &table, &signatures) {
            Some(offset) => {
                if let Some(start) = literal_start.take() {
                    segments.push(Segment::Literal { start, end: pos });
                }
                let mut len = BLOCK_SIZE.min(old.len() - offset);
                while offset + len < old.len()
                    && pos + len < new.len()
                    && old[offset + len] == new[pos + len]
                {
                    len += 1;
                }
                segments.push(Segment::Copy { offset, len });
                pos += len;
                if pos + BLOCK_SIZE <= new.len() {
                    weak = WeakHash::of(&new[pos..pos + BLOCK_SIZE]);
                }
            }
            None => {
                literal_start.get_or_insert(pos);
                pos += 1;
                if pos + BLOCK_SIZE <= new.len() {
                    weak.roll(new[pos - 1], new[pos + BLOCK_SIZE - 1]);
                }
            }
        }
    }

    // Tail shorter than a block window
    if pos < new.len() {
        literal_start.get_or_insert(pos);
    }
    if let Some(start) = literal_start {
        segments.push(Segment::Literal {
            start,
            end: new.len(),
        });
    }

    segments
}

fn build_signatures(data: &[u8]) -> Vec<BlockSignature> {
    data.chunks(BLOCK_SIZE)
        .enumerate()
        .map(|(i, block)| BlockSignature {
            weak: WeakHash::of(block).value(),
            strong: blake3::hash(block),
            offset: i * BLOCK_SIZE,
        })
        .collect()
}

/// Old offset of a block whose content equals `window`, if any.
fn find_match(
    weak: u32,
    window: &[u8],
    table: &HashMap<u32, Vec<usize>>,
    signatures: &[BlockSignature],
) -> Option<usize> {
    let candidates = table.get(&weak)?;
    let strong = blake3::hash(window);
    candidates
        .iter()
        .map(|&idx| &signatures[idx])
        .find(|sig| sig.strong == strong)
        .map(|sig| sig.offset)
}

fn encode_segments(old: &[u8], new: &[u8], segments: &[Segment]) -> DiffBlock {
    let mut block = DiffBlock {
        new_length: new.len() as u64,
        ..DiffBlock::default()
    };
    let mut current = Control {
        diff_len: 0,
        extra_len: 0,
        seek: 0,
    };
    // Old position reached once `current` has been replayed, before its seek.
    let mut old_pos: i64 = 0;
    let mut new_pos = 0usize;

    for segment in segments {
        match *segment {
            Segment::Copy { offset, len } => {
                let target = offset as i64;
                if current.diff_len > 0 || current.extra_len > 0 || target != old_pos {
                    current.seek = target - old_pos;
                    block.controls.push(current);
                }
                current = Control {
                    diff_len: len as u64,
                    extra_len: 0,
                    seek: 0,
                };
                block.diff.extend(
                    new[new_pos..new_pos + len]
                        .iter()
                        .zip(&old[offset..offset + len])
                        .map(|(n, o)| n.wrapping_sub(*o)),
                );
                old_pos = target + len as i64;
                new_pos += len;
            }
            Segment::Literal { start, end } => {
                current.extra_len += (end - start) as u64;
                block.extra.extend_from_slice(&new[start..end]);
                new_pos = end;
            }
        }
    }
    if current.diff_len > 0 || current.extra_len > 0 {
        block.controls.push(current);
    }

    block
}
