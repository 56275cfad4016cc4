//! Block range chunking for log queries

use std::fmt;

use serde::{Deserialize, Serialize};

/// Chunk width used when nothing else is configured
pub const DEFAULT_BLOCK_RANGE_SIZE: u64 = 10_000;

/// Inclusive block interval `[from, to]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub from: u64,
    pub to: u64,
}

impl ScanRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Blocks covered; zero when `from > to`
    pub fn block_count(&self) -> u64 {
        if self.from > self.to {
            return 0;
        }
        (self.to - self.from).saturating_add(1)
    }

    pub fn contains(&self, block: u64) -> bool {
        (self.from..=self.to).contains(&block)
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// Contiguous, non-overlapping chunks covering `[start, head]`
///
/// Each chunk spans at most `width` blocks. Yields nothing when
/// `start > head`. A zero width is treated as one block per chunk.
pub fn plan_chunks(start: u64, head: u64, width: u64) -> Chunks {
    Chunks {
        next: start,
        head,
        width: width.max(1),
        done: start > head,
    }
}

/// Iterator returned by [`plan_chunks`]
#[derive(Debug, Clone)]
pub struct Chunks {
    next: u64,
    head: u64,
    width: u64,
    done: bool,
}

impl Iterator for Chunks {
    type Item = ScanRange;

    fn next(&mut self) -> Option<ScanRange> {
        if self.done {
            return None;
        }
        let to = self
            .next
            .saturating_add(self.width - 1)
            .min(self.head);
        let range = ScanRange::new(self.next, to);
        if to == self.head {
            self.done = true;
        } else {
            self.next = to + 1;
        }
        Some(range)
    }
}
