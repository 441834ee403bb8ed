//! Change maps and granularity folding
//!
//! One [`RangeMap`] per sorted eraser, each with one mark per block. The
//! finest map is filled by comparing the images, coarser maps are derived
//! by folding, and the marked runs of every level become processing units.

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use bitflags::bitflags;

use super::erasers::SortedEraser;
use super::ProcessingUnit;

bitflags! {
    /// What a block needs
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockMark: u8 {
        /// Some byte holds data that has to be erased away
        const NEED_ERASE = 1 << 0;
        /// Some byte has to be programmed to a non-erased value
        const NEED_WRITE = 1 << 1;
    }
}

/// Share of finer blocks (in percent) that must need an erase before the
/// enclosing coarser block is erased instead
pub const FOLD_THRESHOLD_PERCENT: u32 = 70;

/// Change marks for one erase granularity
#[derive(Debug, Clone)]
pub struct RangeMap {
    eraser: SortedEraser,
    limit: u32,
    marks: Vec<BlockMark>,
}

impl RangeMap {
    /// Create an empty map for `eraser`
    ///
    /// `coarser_block_size` is the block size of the next level up, if any;
    /// it decides how many blocks of this level must need an erase before
    /// the coarser block takes over.
    pub fn new(eraser: SortedEraser, coarser_block_size: Option<u32>, chip_size: u32) -> Self {
        let limit = coarser_block_size.map_or(0, |coarser| {
            (coarser / eraser.block_size) * FOLD_THRESHOLD_PERCENT / 100
        });
        Self {
            eraser,
            limit,
            marks: vec![BlockMark::empty(); (chip_size / eraser.block_size) as usize],
        }
    }

    /// The eraser this level uses
    pub fn eraser(&self) -> SortedEraser {
        self.eraser
    }

    /// Block size of this level
    pub fn block_size(&self) -> u32 {
        self.eraser.block_size
    }

    /// Folding limit; more erase marks than this fold into the next level
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Marks, one per block
    pub fn marks(&self) -> &[BlockMark] {
        &self.marks
    }

    /// Indices of this level's blocks inside `[start, end)`
    fn blocks_within(&self, start: u64, end: u64) -> Range<usize> {
        let size = self.block_size() as u64;
        let first = (start / size) as usize;
        let last = ((end / size) as usize).min(self.marks.len());
        first.min(last)..last
    }

    fn unit(&self, first_block: usize, num_blocks: usize) -> ProcessingUnit {
        ProcessingUnit {
            block_size: self.eraser.block_size,
            offset: first_block as u32 * self.eraser.block_size,
            num_blocks: num_blocks as u32,
            function: self.eraser.function,
            region: self.eraser.region,
        }
    }
}

/// Create one empty map per eraser, finest first
pub fn build_range_maps(erasers: &[SortedEraser], chip_size: u32) -> Vec<RangeMap> {
    erasers
        .iter()
        .enumerate()
        .map(|(level, eraser)| {
            let coarser = erasers.get(level + 1).map(|e| e.block_size);
            RangeMap::new(*eraser, coarser, chip_size)
        })
        .collect()
}

/// Mark the blocks of `map` by comparing the images
///
/// A differing byte that is not erased in `old` needs an erase; a differing
/// byte that is not erased in `new` needs a write.
pub fn fill_change_map(map: &mut RangeMap, old: &[u8], new: &[u8], erased_value: u8) {
    let block_size = map.block_size() as usize;
    let blocks = old.chunks_exact(block_size).zip(new.chunks_exact(block_size));

    for (mark, (old_block, new_block)) in map.marks.iter_mut().zip(blocks) {
        *mark = BlockMark::empty();
        for (&o, &n) in old_block.iter().zip(new_block) {
            if o == n {
                continue;
            }
            if o != erased_value {
                *mark |= BlockMark::NEED_ERASE;
            }
            if n != erased_value {
                *mark |= BlockMark::NEED_WRITE;
            }
            if mark.is_all() {
                break;
            }
        }
    }
}

/// Promote densely changed regions to coarser erases
///
/// Bottom-up, a coarse block is marked for erase when more than the finer
/// level's limit of its constituent blocks need an erase; it needs a write
/// if any of them did. Top-down afterwards, every block marked for erase
/// clears the marks of all finer blocks inside it.
pub fn fold_range_maps(maps: &mut [RangeMap]) {
    for level in 1..maps.len() {
        let (lower, upper) = maps.split_at_mut(level);
        let finer = &lower[level - 1];
        let coarse = &mut upper[0];
        let coarse_size = coarse.block_size() as u64;

        for (index, mark) in coarse.marks.iter_mut().enumerate() {
            let start = index as u64 * coarse_size;
            let nested = &finer.marks[finer.blocks_within(start, start + coarse_size)];

            let erase_marked = nested
                .iter()
                .filter(|m| m.contains(BlockMark::NEED_ERASE))
                .count() as u32;
            let write_marked = nested.iter().any(|m| m.contains(BlockMark::NEED_WRITE));

            if erase_marked > finer.limit {
                *mark = BlockMark::NEED_ERASE;
                if write_marked {
                    *mark |= BlockMark::NEED_WRITE;
                }
            }
        }
    }

    for level in (1..maps.len()).rev() {
        let (lower, upper) = maps.split_at_mut(level);
        let coarse = &upper[0];
        let coarse_size = coarse.block_size() as u64;

        for (index, mark) in coarse.marks.iter().enumerate() {
            if !mark.contains(BlockMark::NEED_ERASE) {
                continue;
            }
            let start = index as u64 * coarse_size;
            for finer in lower.iter_mut() {
                let range = finer.blocks_within(start, start + coarse_size);
                finer.marks[range].fill(BlockMark::empty());
            }
        }
    }
}

/// Turn runs of marked blocks into processing units
///
/// Levels are emitted finest first, each in address order.
pub fn emit_units(maps: &[RangeMap]) -> Vec<ProcessingUnit> {
    let mut units = Vec::new();

    for map in maps {
        let mut run = 0;
        for (index, mark) in map.marks.iter().enumerate() {
            if !mark.is_empty() {
                run += 1;
                continue;
            }
            if run != 0 {
                units.push(map.unit(index - run, run));
                run = 0;
            }
        }
        if run != 0 {
            units.push(map.unit(map.marks.len() - run, run));
        }
    }

    units
}
