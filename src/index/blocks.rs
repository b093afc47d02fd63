//! Continuous block algebra
//!
//! A continuous block is a maximal gap-free run `(start, extent)`. Sorted
//! lists of blocks are merged level by level (file → subdirectory → root →
//! channel) with one rule:
//!
//! ```text
//! end(a) == start(b)  → extend a
//! end(a) <  start(b)  → append b
//! end(a) >  start(b)  → overlap error
//! ```

use crate::index::error::{IndexError, IndexResult};
use serde::Serialize;

/// A gap-free run of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContinuousBlock {
    /// First sample
    pub start: u64,
    /// Number of samples
    pub extent: u64,
}

impl ContinuousBlock {
    pub fn new(start: u64, extent: u64) -> Self {
        Self { start, extent }
    }

    /// One past the last sample
    pub fn end(&self) -> u64 {
        self.start + self.extent
    }

    pub fn contains(&self, sample: u64) -> bool {
        sample >= self.start && sample < self.end()
    }
}

/// Append one block to a sorted list
pub fn push_block(blocks: &mut Vec<ContinuousBlock>, block: ContinuousBlock) -> IndexResult<()> {
    if block.extent == 0 {
        return Ok(());
    }
    match blocks.last_mut() {
        Some(last) if last.end() > block.start => Err(IndexError::Overlap(format!(
            "Block ending at {} overlaps block starting at {}",
            last.end(),
            block.start
        ))),
        Some(last) if last.end() == block.start => {
            last.extent += block.extent;
            Ok(())
        }
        _ => {
            blocks.push(block);
            Ok(())
        }
    }
}

/// Merge a later sorted list onto the end of `blocks`
pub fn merge_blocks(
    blocks: &mut Vec<ContinuousBlock>,
    later: impl IntoIterator<Item = ContinuousBlock>,
) -> IndexResult<()> {
    for block in later {
        push_block(blocks, block)?;
    }
    Ok(())
}

/// Blocks intersecting the inclusive range `[start, stop]`, clipped to it
pub fn clip_blocks(blocks: &[ContinuousBlock], start: u64, stop: u64) -> Vec<ContinuousBlock> {
    if stop < start {
        return Vec::new();
    }
    let first = blocks.partition_point(|b| b.end() <= start);
    blocks[first..]
        .iter()
        .take_while(|b| b.start <= stop)
        .map(|b| {
            let from = b.start.max(start);
            let to = b.end().min(stop.saturating_add(1));
            ContinuousBlock::new(from, to - from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn b(start: u64, extent: u64) -> ContinuousBlock {
        ContinuousBlock::new(start, extent)
    }

    #[test]
    fn test_adjacent_blocks_extend() {
        let mut blocks = vec![b(0, 50)];
        push_block(&mut blocks, b(50, 25)).unwrap();
        assert_eq!(blocks, vec![b(0, 75)]);
    }

    #[test]
    fn test_gap_starts_new_block() {
        let mut blocks = vec![b(0, 50)];
        push_block(&mut blocks, b(100, 50)).unwrap();
        assert_eq!(blocks, vec![b(0, 50), b(100, 50)]);
    }

    #[test]
    fn test_overlap_is_error() {
        let mut blocks = vec![b(0, 50)];
        let result = push_block(&mut blocks, b(49, 10));
        assert!(matches!(result, Err(IndexError::Overlap(_))));
        assert_eq!(blocks, vec![b(0, 50)]);
    }

    #[test]
    fn test_empty_blocks_ignored() {
        let mut blocks = Vec::new();
        push_block(&mut blocks, b(10, 0)).unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_clip_blocks() {
        let blocks = vec![b(0, 50), b(100, 50), b(200, 10)];

        assert_eq!(clip_blocks(&blocks, 10, 120), vec![b(10, 40), b(100, 21)]);
        assert_eq!(clip_blocks(&blocks, 0, 1000), blocks);
        assert!(clip_blocks(&blocks, 60, 90).is_empty());
        assert_eq!(clip_blocks(&blocks, 149, 149), vec![b(149, 1)]);
        assert!(clip_blocks(&blocks, 150, 199).is_empty());
    }

    /// Sorted, non-overlapping blocks with random gaps (possibly zero)
    fn block_list() -> impl Strategy<Value = Vec<ContinuousBlock>> {
        prop::collection::vec((0u64..20, 1u64..30), 0..40).prop_map(|pairs| {
            let mut at = 0;
            pairs
                .into_iter()
                .map(|(gap, extent)| {
                    let block = b(at + gap, extent);
                    at = block.end();
                    block
                })
                .collect()
        })
    }

    fn merge_all(parts: &[&[ContinuousBlock]]) -> Vec<ContinuousBlock> {
        let mut acc = Vec::new();
        for part in parts {
            merge_blocks(&mut acc, part.iter().copied()).unwrap();
        }
        acc
    }

    proptest! {
        #[test]
        fn prop_merge_is_associative(blocks in block_list(), i in 0usize..40, j in 0usize..40) {
            let (i, j) = (i.min(blocks.len()), j.min(blocks.len()));
            let (i, j) = (i.min(j), i.max(j));
            let (a, rest) = blocks.split_at(i);
            let (m, c) = rest.split_at(j - i);

            let left = merge_all(&[merge_all(&[a, m]).as_slice(), c]);
            let right = merge_all(&[a, merge_all(&[m, c]).as_slice()]);
            prop_assert_eq!(left, right);
        }

        #[test]
        fn prop_merge_is_maximal(blocks in block_list()) {
            let merged = merge_all(&[blocks.as_slice()]);
            let total: u64 = blocks.iter().map(|b| b.extent).sum();
            prop_assert_eq!(merged.iter().map(|b| b.extent).sum::<u64>(), total);
            for pair in merged.windows(2) {
                prop_assert!(pair[0].end() < pair[1].start);
            }
        }

        #[test]
        fn prop_adjacency_law(s0 in 0u64..1000, e0 in 1u64..1000, gap in 0u64..10, e1 in 1u64..1000) {
            let mut blocks = vec![b(s0, e0)];
            push_block(&mut blocks, b(s0 + e0 + gap, e1)).unwrap();
            if gap == 0 {
                prop_assert_eq!(blocks, vec![b(s0, e0 + e1)]);
            } else {
                prop_assert_eq!(blocks, vec![b(s0, e0), b(s0 + e0 + gap, e1)]);
            }

            let mut blocks = vec![b(s0, e0)];
            prop_assert!(push_block(&mut blocks, b(s0 + e0 - 1, e1)).is_err());
        }
    }
}
