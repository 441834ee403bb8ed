//! Chip database for runtime loading and lookup
//!
//! This module provides the `ChipDatabase` type for loading chip definitions
//! from RON files at runtime. Every chip is checked with
//! [`FlashChip::validate`] before it is accepted.

use alloc::{format, string::String, vec::Vec};
use std::fs;
use std::io;
use std::path::Path;

use super::types::{EraseBlock, EraseRegion, FlashChip, WriteGranularity};

/// Error type for chip database operations
#[derive(Debug)]
pub enum ChipDbError {
    /// I/O error reading files
    Io(io::Error),
    /// RON parsing error
    Parse(ron::error::SpannedError),
    /// Validation error
    Validation(String),
}

impl From<io::Error> for ChipDbError {
    fn from(e: io::Error) -> Self {
        ChipDbError::Io(e)
    }
}

impl From<ron::error::SpannedError> for ChipDbError {
    fn from(e: ron::error::SpannedError) -> Self {
        ChipDbError::Parse(e)
    }
}

impl std::fmt::Display for ChipDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChipDbError::Io(e) => write!(f, "I/O error: {}", e),
            ChipDbError::Parse(e) => write!(f, "Parse error: {}", e),
            ChipDbError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ChipDbError {}

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Size specification with human-readable units (for RON parsing)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum Size {
    /// Size in bytes
    B(u32),
    /// Size in kibibytes (1024 bytes)
    KiB(u32),
    /// Size in mebibytes (1024 * 1024 bytes)
    MiB(u32),
}

impl Size {
    /// Convert to bytes
    pub fn to_bytes(self) -> u32 {
        match self {
            Size::B(n) => n,
            Size::KiB(n) => n * 1024,
            Size::MiB(n) => n * 1024 * 1024,
        }
    }
}

/// Region definition: size and count pair
#[derive(Debug, Clone, serde::Deserialize)]
struct RegionDef {
    size: Size,
    count: u32,
}

/// Erase function definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
struct EraseBlockDef {
    #[serde(default = "default_supported")]
    supported: bool,
    regions: Vec<RegionDef>,
}

fn default_supported() -> bool {
    true
}

/// Single chip definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
struct ChipDef {
    name: String,
    total_size: Size,
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default = "default_erased_value")]
    erased_value: u8,
    #[serde(default)]
    write_granularity: WriteGranularity,
    erase_blocks: Vec<EraseBlockDef>,
}

fn default_page_size() -> u32 {
    256
}

fn default_erased_value() -> u8 {
    0xFF
}

/// Vendor definition containing multiple chips
#[derive(Debug, Clone, serde::Deserialize)]
struct VendorDef {
    vendor: String,
    chips: Vec<ChipDef>,
}

impl EraseBlockDef {
    fn into_erase_block(self) -> Result<EraseBlock, ChipDbError> {
        if self.regions.len() > super::MAX_ERASE_REGIONS {
            return Err(ChipDbError::Validation(format!(
                "{} erase regions defined, at most {} supported",
                self.regions.len(),
                super::MAX_ERASE_REGIONS
            )));
        }
        let regions: Vec<EraseRegion> = self
            .regions
            .iter()
            .map(|r| EraseRegion::new(r.size.to_bytes(), r.count))
            .collect();
        let eb = EraseBlock::with_regions(&regions);
        Ok(if self.supported { eb } else { eb.unsupported() })
    }
}

// ============================================================================
// Chip database
// ============================================================================

/// Runtime chip database
///
/// Holds a collection of flash chip definitions that can be loaded from RON files.
#[derive(Debug, Clone, Default)]
pub struct ChipDatabase {
    chips: Vec<FlashChip>,
}

impl ChipDatabase {
    /// Create an empty chip database
    pub fn new() -> Self {
        Self { chips: Vec::new() }
    }

    /// Load chip definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, ChipDbError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load chip definitions from a RON string
    ///
    /// Either all chips of the vendor file are added or none are.
    pub fn load_ron(&mut self, content: &str) -> Result<usize, ChipDbError> {
        let vendor_def: VendorDef = ron::from_str(content)?;
        let mut loaded = Vec::with_capacity(vendor_def.chips.len());

        for chip_def in vendor_def.chips {
            let erase_blocks = chip_def
                .erase_blocks
                .into_iter()
                .map(EraseBlockDef::into_erase_block)
                .collect::<Result<Vec<_>, _>>()?;

            let chip = FlashChip {
                vendor: vendor_def.vendor.clone(),
                name: chip_def.name,
                total_size: chip_def.total_size.to_bytes(),
                page_size: chip_def.page_size,
                erased_value: chip_def.erased_value,
                write_granularity: chip_def.write_granularity,
                erase_blocks,
            };

            chip.validate().map_err(|defect| {
                ChipDbError::Validation(format!("{} {}: {}", chip.vendor, chip.name, defect))
            })?;
            loaded.push(chip);
        }

        let count = loaded.len();
        self.chips.extend(loaded);
        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ChipDbError> {
        let mut total = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "ron") {
                total += self.load_file(&path)?;
            }
        }

        Ok(total)
    }

    /// Get the number of chips in the database
    pub fn len(&self) -> usize {
        self.chips.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.chips.is_empty()
    }

    /// Find a chip by its exact name (case-insensitive)
    pub fn find_exact(&self, name: &str) -> Option<&FlashChip> {
        self.chips.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Find chips by vendor (case-insensitive partial match)
    pub fn find_by_vendor(&self, vendor: &str) -> Vec<&FlashChip> {
        let vendor_lower = vendor.to_lowercase();
        self.chips
            .iter()
            .filter(|c| c.vendor.to_lowercase().contains(&vendor_lower))
            .collect()
    }

    /// Iterate over all chips
    pub fn iter(&self) -> impl Iterator<Item = &FlashChip> {
        self.chips.iter()
    }
}
