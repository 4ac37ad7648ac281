//! Splitting one contiguous buffer into per-lane blocks.
//!
//! A buffer of `total` elements is divided into at most `lanes` blocks.
//! Block boundaries fall on multiples of a chunk (the alignment unit of
//! the memory banks), so every block except the last holds a whole number
//! of chunks.  Whole chunks are dealt out as evenly as possible, earlier
//! lanes taking one extra chunk when they do not divide evenly, and the
//! sub-chunk tail of the buffer is appended to the last block.

use std::ops::Range;

use log::debug;

/// A sub-range `[offset, offset + length)` of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDescriptor {
    pub offset: usize,
    pub length: usize,
}

impl BlockDescriptor {
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// One past the last element of the block.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Number of `T` elements in a chunk of `chunk_bytes` bytes.
///
/// Returns `None` if the chunk is empty or not a whole number of elements.
pub fn chunk_elements<T>(chunk_bytes: usize) -> Option<usize> {
    let size = std::mem::size_of::<T>();
    if size == 0 || chunk_bytes == 0 || chunk_bytes % size != 0 {
        return None;
    }
    Some(chunk_bytes / size)
}

/// Partition `total_elements` into at most `lane_count` chunk-aligned blocks.
///
/// Lanes that receive no whole chunk are left out, so fewer blocks than
/// lanes come back when the buffer holds fewer chunks than there are
/// lanes.  A buffer shorter than one chunk yields a single block, and an
/// empty buffer yields no blocks at all.
///
/// # Panics
///
/// Panics if `lane_count` or `chunk_elements` is zero.
pub fn partition(
    total_elements: usize,
    lane_count: usize,
    chunk_elements: usize,
) -> Vec<BlockDescriptor> {
    assert!(lane_count > 0, "lane count must be positive");
    assert!(chunk_elements > 0, "chunk size must be positive");

    let chunks_total = total_elements / chunk_elements;
    let remainder = total_elements % chunk_elements;
    let per_lane = chunks_total / lane_count;
    let with_extra = chunks_total % lane_count;

    let mut blocks = Vec::with_capacity(lane_count.min(chunks_total.max(1)));
    let mut offset = 0;
    for lane in 0..lane_count {
        let chunks = if lane < with_extra { per_lane + 1 } else { per_lane };
        let length = chunks * chunk_elements;
        if length == 0 {
            continue;
        }
        blocks.push(BlockDescriptor::new(offset, length));
        offset += length;
    }

    if remainder > 0 {
        match blocks.last_mut() {
            Some(last) => last.length += remainder,
            None => blocks.push(BlockDescriptor::new(0, remainder)),
        }
    }

    for (i, block) in blocks.iter().enumerate() {
        debug!("block {i}: offset {} length {}", block.offset, block.length);
    }
    blocks
}
