//! Eraser catalog
//!
//! Picks the erase functions usable for a given erase extent and sorts them
//! by block size, smallest first.

use heapless::Vec;
use log::{debug, error, warn};

use crate::chip::{FlashChip, MAX_ERASE_FUNCTIONS};
use crate::error::{Error, Result};
use crate::flash::FlashDevice;

/// An erase function/region pair selected for planning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortedEraser {
    /// Index into the chip's erase functions
    pub function: usize,
    /// Index into that function's regions
    pub region: usize,
    /// Block size of the selected region, in bytes
    pub block_size: u32,
}

/// Erasers strictly ascending by block size
pub type SortedErasers = Vec<SortedEraser, MAX_ERASE_FUNCTIONS>;

/// Decides whether an erase function may be used at all
///
/// Controllers do not always accept every erase command a chip supports.
/// The filter is consulted once per candidate function before planning.
pub trait EraserFilter {
    /// Returns `true` if erase function `function` of `chip` is usable
    fn allows(&mut self, chip: &FlashChip, function: usize) -> bool;
}

impl<F: EraserFilter + ?Sized> EraserFilter for &mut F {
    fn allows(&mut self, chip: &FlashChip, function: usize) -> bool {
        (**self).allows(chip, function)
    }
}

/// Filter that keeps every erase function
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl EraserFilter for AllowAll {
    fn allows(&mut self, _chip: &FlashChip, _function: usize) -> bool {
        true
    }
}

/// Filter that asks the device whether it would accept each function
///
/// Every candidate is tried with [`FlashDevice::erase_dry_run`] over the
/// whole chip. Functions the device rejects are dropped.
pub struct DryRunFilter<'a, D: FlashDevice + ?Sized> {
    device: &'a mut D,
}

impl<'a, D: FlashDevice + ?Sized> DryRunFilter<'a, D> {
    /// Create a filter probing `device`
    pub fn new(device: &'a mut D) -> Self {
        Self { device }
    }
}

impl<D: FlashDevice + ?Sized> EraserFilter for DryRunFilter<'_, D> {
    fn allows(&mut self, chip: &FlashChip, function: usize) -> bool {
        match self.device.erase_dry_run(function, 0, chip.total_size) {
            Ok(()) => true,
            Err(e) => {
                debug!("Dropping erase function {}: {}", function, e);
                false
            }
        }
    }
}

/// Build the sorted eraser list for an erase of `erase_size` bytes
///
/// For each usable function that the filter allows, the first region whose
/// total size reaches `erase_size` is inserted at its ascending position.
/// A region with a block size that is already present is skipped, so the
/// function seen first wins.
///
/// If no function covers the extent, the region with the largest coverage
/// seen is returned on its own. The resulting erase may be incomplete.
///
/// # Errors
/// `Error::NoEraser` if the chip has no usable erase region at all.
pub fn fill_sorted_erasers<F: EraserFilter + ?Sized>(
    chip: &FlashChip,
    erase_size: u32,
    filter: &mut F,
) -> Result<SortedErasers> {
    let mut sorted = SortedErasers::new();
    let mut fallback: Option<(u64, SortedEraser)> = None;

    for (function, eb) in chip
        .erase_blocks()
        .iter()
        .enumerate()
        .take(MAX_ERASE_FUNCTIONS)
    {
        if !eb.is_usable() || !filter.allows(chip, function) {
            continue;
        }

        let mut covering = None;
        for (region, r) in eb.regions().iter().enumerate() {
            if r.size == 0 {
                continue;
            }
            let eraser = SortedEraser {
                function,
                region,
                block_size: r.size,
            };
            let total = r.total_size();
            if total >= erase_size as u64 {
                covering = Some(eraser);
                break;
            }
            if fallback.map_or(true, |(best, _)| total > best) {
                fallback = Some((total, eraser));
            }
        }

        let Some(eraser) = covering else {
            continue;
        };

        let pos = sorted
            .iter()
            .position(|e| e.block_size >= eraser.block_size)
            .unwrap_or(sorted.len());
        if sorted
            .get(pos)
            .is_some_and(|e| e.block_size == eraser.block_size)
        {
            debug!(
                "Erase function {} duplicates block size {:#x} of function {}, skipping",
                function, eraser.block_size, sorted[pos].function
            );
            continue;
        }
        sorted.insert(pos, eraser).map_err(|_| Error::InvalidChip)?;
    }

    if !sorted.is_empty() {
        drop_non_nesting(&mut sorted);
        debug!("Found {} usable erase granularities", sorted.len());
        return Ok(sorted);
    }

    match fallback {
        Some((total, eraser)) => {
            warn!(
                "No erase function covers {:#x} bytes, falling back to function {} region {} \
                 ({:#x} bytes). The erase may be incomplete.",
                erase_size, eraser.function, eraser.region, total
            );
            sorted.push(eraser).map_err(|_| Error::InvalidChip)?;
            Ok(sorted)
        }
        None => {
            error!("No erasers found for {} {}", chip.vendor(), chip.name());
            Err(Error::NoEraser)
        }
    }
}

/// Keep only erasers whose block size is a multiple of the next finer one
///
/// Folding clears finer blocks inside a coarser one. A finer block that
/// straddles a coarse boundary would be cleared while only partly covered.
fn drop_non_nesting(sorted: &mut SortedErasers) {
    let mut finer: Option<u32> = None;
    sorted.retain(|eraser| {
        if let Some(size) = finer {
            if eraser.block_size % size != 0 {
                warn!(
                    "Erase function {} block size {:#x} is not a multiple of {:#x}, skipping",
                    eraser.function, eraser.block_size, size
                );
                return false;
            }
        }
        finer = Some(eraser.block_size);
        true
    });
}
