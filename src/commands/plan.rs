//! Plan command: show what a write would do

use super::list::format_size;
use super::read_image_file;
use crate::error::Result;
use flashdiff_core::chip::FlashChip;
use flashdiff_core::plan::{self, EraserFilter, ExtentMode};
use std::path::Path;

/// Leaves out the erase functions named on the command line
struct Restricted<'a>(&'a [usize]);

impl EraserFilter for Restricted<'_> {
    fn allows(&mut self, _chip: &FlashChip, function: usize) -> bool {
        !self.0.contains(&function)
    }
}

/// Print the processing units for turning `old` into `new`
pub fn run_plan(
    chip: &FlashChip,
    old: &Path,
    new: &Path,
    whole_chip: bool,
    restrict: &[usize],
) -> Result<()> {
    let old = read_image_file(old, chip)?;
    let new = read_image_file(new, chip)?;
    let mode = if whole_chip {
        ExtentMode::WholeChip
    } else {
        ExtentMode::Diff
    };

    let descriptor = plan::plan(chip, &old, &new, mode, &mut Restricted(restrict))?;

    println!(
        "{} {}: {} ({})",
        chip.vendor(),
        chip.name(),
        format_size(chip.total_size),
        chip.write_granularity
    );
    if descriptor.is_empty() {
        println!("Images are identical, nothing to do");
        return Ok(());
    }

    println!(
        "{} processing unit(s) covering {} bytes:",
        descriptor.units().len(),
        descriptor.total_bytes()
    );
    for unit in descriptor.units() {
        println!("  {}", unit);
    }
    Ok(())
}
