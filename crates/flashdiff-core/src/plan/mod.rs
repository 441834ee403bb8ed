//! Erase/write planning
//!
//! [`prepare_action_descriptor`] compares the old and new image and returns
//! an [`ActionDescriptor`]: the list of regions that need work, each tagged
//! with the erase granularity to use. The steps are:
//!
//! 1. Pick the usable erase granularities ([`erasers`]).
//! 2. Mark changed blocks at the finest granularity.
//! 3. Fold densely changed regions into coarser erases ([`range_map`]).
//! 4. Coalesce marked blocks into processing units.

pub mod erasers;
pub mod range_map;

use alloc::vec::Vec;
use core::fmt;

use log::debug;

use crate::chip::FlashChip;
use crate::error::{Error, Result};

pub use erasers::{fill_sorted_erasers, AllowAll, DryRunFilter, EraserFilter, SortedEraser};
pub use range_map::{BlockMark, FOLD_THRESHOLD_PERCENT};

/// A run of consecutive blocks of one erase granularity that need work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingUnit {
    /// Block size of the erase granularity
    pub block_size: u32,
    /// Start address, aligned to `block_size`
    pub offset: u32,
    /// Number of consecutive blocks
    pub num_blocks: u32,
    /// Erase function index
    pub function: usize,
    /// Region index within the erase function
    pub region: usize,
}

impl ProcessingUnit {
    /// Size of the unit in bytes
    pub fn size(&self) -> u32 {
        self.block_size * self.num_blocks
    }

    /// Address one past the end of the unit
    pub fn end(&self) -> u32 {
        self.offset + self.size()
    }

    /// Start addresses of the unit's blocks
    pub fn block_offsets(&self) -> impl Iterator<Item = u32> {
        let (offset, block_size) = (self.offset, self.block_size);
        (0..self.num_blocks).map(move |i| offset + i * block_size)
    }
}

impl fmt::Display for ProcessingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:08X}..0x{:08X} {:#x} x {} (eraser {}, region {})",
            self.offset,
            self.end(),
            self.block_size,
            self.num_blocks,
            self.function,
            self.region
        )
    }
}

/// The plan for one reprogramming cycle
#[derive(Debug, Clone)]
pub struct ActionDescriptor<'a> {
    old: &'a [u8],
    new: &'a [u8],
    units: Vec<ProcessingUnit>,
}

impl<'a> ActionDescriptor<'a> {
    /// Contents the chip is assumed to have
    pub fn old(&self) -> &'a [u8] {
        self.old
    }

    /// Contents the chip should end up with
    pub fn new_contents(&self) -> &'a [u8] {
        self.new
    }

    /// Processing units, finest granularity first, each level in address order
    pub fn units(&self) -> &[ProcessingUnit] {
        &self.units
    }

    /// Returns `true` if there is nothing to do
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Total number of bytes covered by the units
    pub fn total_bytes(&self) -> u64 {
        self.units.iter().map(|u| u.size() as u64).sum()
    }

    fn dump(&self) {
        debug!("Plan with {} processing units:", self.units.len());
        for unit in &self.units {
            debug!("  {}", unit);
        }
    }
}

/// How far the erase planning has to reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtentMode {
    /// Up to and including the last differing byte
    #[default]
    Diff,
    /// The whole chip
    WholeChip,
}

/// Compute the erase extent for `old` and `new`
pub fn required_extent(old: &[u8], new: &[u8], mode: ExtentMode) -> u32 {
    match mode {
        ExtentMode::Diff => old
            .iter()
            .zip(new)
            .rposition(|(o, n)| o != n)
            .map_or(0, |last| last as u32 + 1),
        ExtentMode::WholeChip => old.len() as u32,
    }
}

fn check_image_size(chip: &FlashChip, image: &[u8]) -> Result<()> {
    if image.len() != chip.total_size as usize {
        return Err(Error::SizeMismatch {
            expected: chip.total_size,
            actual: image.len(),
        });
    }
    Ok(())
}

/// Build the plan for turning `old` into `new`
///
/// `erase_size` is the extent every selected eraser must be able to cover,
/// usually computed with [`required_extent`]. `filter` decides which erase
/// functions may be used.
///
/// # Errors
/// * `SizeMismatch` - If either image is not exactly the chip size
/// * `NoEraser` - If the chip has no usable erase function
pub fn prepare_action_descriptor<'a, F: EraserFilter + ?Sized>(
    chip: &FlashChip,
    old: &'a [u8],
    new: &'a [u8],
    erase_size: u32,
    filter: &mut F,
) -> Result<ActionDescriptor<'a>> {
    check_image_size(chip, old)?;
    check_image_size(chip, new)?;

    let erasers = fill_sorted_erasers(chip, erase_size, filter)?;
    let mut maps = range_map::build_range_maps(&erasers, chip.total_size);
    if let Some(finest) = maps.first_mut() {
        range_map::fill_change_map(finest, old, new, chip.erased_value);
    }
    range_map::fold_range_maps(&mut maps);

    let descriptor = ActionDescriptor {
        old,
        new,
        units: range_map::emit_units(&maps),
    };
    descriptor.dump();
    Ok(descriptor)
}

/// Build a plan, computing the extent with `mode`
pub fn plan<'a, F: EraserFilter + ?Sized>(
    chip: &FlashChip,
    old: &'a [u8],
    new: &'a [u8],
    mode: ExtentMode,
    filter: &mut F,
) -> Result<ActionDescriptor<'a>> {
    let extent = required_extent(old, new, mode);
    prepare_action_descriptor(chip, old, new, extent, filter)
}
