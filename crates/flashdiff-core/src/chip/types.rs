//! Flash chip type definitions

use alloc::{string::String, vec::Vec};
use core::fmt;

/// Maximum number of regions a single erase function can describe
pub const MAX_ERASE_REGIONS: usize = 8;

/// Maximum number of erase functions a chip can expose
pub const MAX_ERASE_FUNCTIONS: usize = 8;

/// Region definition: size and count pair
///
/// Represents a contiguous region of blocks with the same size.
/// For non-uniform flash chips (like boot sector chips), multiple
/// regions can be combined to describe the full layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct EraseRegion {
    /// Size of each block in this region, in bytes
    pub size: u32,
    /// Number of blocks in this region
    pub count: u32,
}

impl EraseRegion {
    /// Create a new erase region
    pub const fn new(size: u32, count: u32) -> Self {
        Self { size, count }
    }

    /// Get the total size of this region in bytes
    ///
    /// Computed in 64 bits so that bogus chip descriptions cannot overflow.
    pub const fn total_size(&self) -> u64 {
        self.size as u64 * self.count as u64
    }
}

/// Erase function definition
///
/// Represents one erase operation supported by a flash chip, described
/// by one or more regions. For uniform chips there's typically one region.
/// For non-uniform chips (boot sector variants) there may be several
/// regions with different block sizes, laid out back to back from
/// address 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct EraseBlock {
    /// Whether the hardware can execute this erase function
    pub supported: bool,
    /// Number of regions for this erase operation
    pub region_count: u8,
    /// Regions for this erase operation
    pub regions: [EraseRegion; MAX_ERASE_REGIONS],
}

impl EraseBlock {
    /// Create a new erase function with a single uniform region
    pub const fn uniform(size: u32, count: u32) -> Self {
        Self::with_regions(&[EraseRegion::new(size, count)])
    }

    /// Create an erase function from multiple regions
    pub const fn with_regions(regions: &[EraseRegion]) -> Self {
        let mut eb = Self {
            supported: true,
            region_count: 0,
            regions: [EraseRegion::new(0, 0); MAX_ERASE_REGIONS],
        };
        let mut i = 0;
        while i < regions.len() && i < MAX_ERASE_REGIONS {
            eb.regions[i] = regions[i];
            i += 1;
        }
        eb.region_count = i as u8;
        eb
    }

    /// Mark this erase function as not executable by the hardware
    pub const fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    /// Get the active regions for this erase function
    pub fn regions(&self) -> &[EraseRegion] {
        let count = (self.region_count as usize).min(MAX_ERASE_REGIONS);
        &self.regions[..count]
    }

    /// Check whether this erase function can be used at all
    ///
    /// A function without blocks, or one the hardware cannot execute, is
    /// treated as absent.
    pub fn is_usable(&self) -> bool {
        self.supported && self.regions().first().is_some_and(|r| r.count > 0)
    }

    /// Get the total size covered by this erase operation
    pub fn total_size(&self) -> u64 {
        self.regions().iter().map(|r| r.total_size()).sum()
    }

    /// Get the block size at a given offset within this erase operation's coverage.
    ///
    /// For uniform erase blocks, this returns the same size regardless of offset.
    /// For non-uniform layouts (boot sector chips), this returns the block size
    /// for the region containing the given offset.
    pub fn block_size_at_offset(&self, offset: u32) -> Option<u32> {
        let offset = offset as u64;
        let mut current_offset = 0u64;
        for region in self.regions() {
            let region_end = current_offset + region.total_size();
            if offset < region_end {
                return Some(region.size);
            }
            current_offset = region_end;
        }
        None
    }
}

/// Write granularity
///
/// The smallest unit a write command accepts, which also decides when a
/// partial rewrite needs a preceding erase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteGranularity {
    /// Can write individual bits (1->0 only)
    Bit,
    /// Can write individual bytes
    Byte,
    /// Must write 128-byte chunks
    Bytes128,
    /// Must write 256-byte pages
    #[default]
    #[cfg_attr(feature = "std", serde(alias = "Page"))]
    Bytes256,
    /// Must write 264-byte pages (DataFlash)
    Bytes264,
    /// Must write 512-byte chunks
    Bytes512,
    /// Must write 528-byte pages (DataFlash)
    Bytes528,
    /// Must write 1024-byte chunks
    Bytes1024,
    /// Must write 1056-byte pages (DataFlash)
    Bytes1056,
    /// Any byte can be written at any time, the chip erases internally
    ByteImplicitErase,
}

impl WriteGranularity {
    /// Chunk size in bytes the change analysis works with
    pub const fn stride(self) -> usize {
        match self {
            Self::Bit | Self::Byte | Self::ByteImplicitErase => 1,
            Self::Bytes128 => 128,
            Self::Bytes256 => 256,
            Self::Bytes264 => 264,
            Self::Bytes512 => 512,
            Self::Bytes528 => 528,
            Self::Bytes1024 => 1024,
            Self::Bytes1056 => 1056,
        }
    }
}

impl fmt::Display for WriteGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bit => write!(f, "bit"),
            Self::Byte => write!(f, "byte"),
            Self::ByteImplicitErase => write!(f, "byte (implicit erase)"),
            other => write!(f, "{} bytes", other.stride()),
        }
    }
}

/// Inconsistency found by [`FlashChip::validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipDefect {
    /// Chip size is zero
    ZeroSize,
    /// More erase functions than the engine can handle
    TooManyEraseFunctions {
        /// Number of functions defined
        count: usize,
    },
    /// A region has blocks of size zero, or a size but no blocks
    EmptyRegion {
        /// Erase function index
        function: usize,
        /// Region index
        region: usize,
    },
    /// An erase function does not cover exactly the whole chip
    CoverageMismatch {
        /// Erase function index
        function: usize,
        /// Bytes covered by the function
        covered: u64,
    },
}

impl fmt::Display for ChipDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSize => write!(f, "chip size is zero"),
            Self::TooManyEraseFunctions { count } => write!(
                f,
                "{} erase functions defined, at most {} supported",
                count, MAX_ERASE_FUNCTIONS
            ),
            Self::EmptyRegion { function, region } => write!(
                f,
                "erase function {} region {} has a zero size or zero count",
                function, region
            ),
            Self::CoverageMismatch { function, covered } => write!(
                f,
                "erase function {} covers {} bytes instead of the chip size",
                function, covered
            ),
        }
    }
}

/// Flash chip definition
///
/// Everything the planner and executor need to know about a chip: its
/// size, what an erased byte reads as, how writes are chunked and which
/// erase functions exist.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashChip {
    /// Vendor name (e.g., "Winbond")
    pub vendor: String,
    /// Chip model name (e.g., "W25Q64FV")
    pub name: String,
    /// Total flash size in bytes
    pub total_size: u32,
    /// Page size in bytes, used as the read-back chunk in paranoid mode
    pub page_size: u32,
    /// Value every byte reads as after an erase
    pub erased_value: u8,
    /// Write granularity
    pub write_granularity: WriteGranularity,
    /// Available erase functions, in the chip's own order
    pub erase_blocks: Vec<EraseBlock>,
}

impl FlashChip {
    /// Create a chip with the common defaults (0xFF erased value, 256-byte pages)
    pub fn new(vendor: &str, name: &str, total_size: u32) -> Self {
        Self {
            vendor: String::from(vendor),
            name: String::from(name),
            total_size,
            page_size: 256,
            erased_value: 0xFF,
            write_granularity: WriteGranularity::default(),
            erase_blocks: Vec::new(),
        }
    }

    /// Set the write granularity
    pub fn with_granularity(mut self, granularity: WriteGranularity) -> Self {
        self.write_granularity = granularity;
        self
    }

    /// Append an erase function
    pub fn with_erase_block(mut self, eb: EraseBlock) -> Self {
        self.erase_blocks.push(eb);
        self
    }

    /// Get vendor name as a string slice
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Get chip name as a string slice
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get erase functions as a slice
    pub fn erase_blocks(&self) -> &[EraseBlock] {
        &self.erase_blocks
    }

    /// Check the erase layout for inconsistencies
    ///
    /// Every region must have a non-zero size exactly when it has a
    /// non-zero count, and every defined erase function must cover the
    /// whole chip.
    pub fn validate(&self) -> Result<(), ChipDefect> {
        if self.total_size == 0 {
            return Err(ChipDefect::ZeroSize);
        }
        if self.erase_blocks.len() > MAX_ERASE_FUNCTIONS {
            return Err(ChipDefect::TooManyEraseFunctions {
                count: self.erase_blocks.len(),
            });
        }

        for (function, eb) in self.erase_blocks().iter().enumerate() {
            for (region, r) in eb.regions().iter().enumerate() {
                if (r.size == 0) != (r.count == 0) {
                    return Err(ChipDefect::EmptyRegion { function, region });
                }
            }
            let covered = eb.total_size();
            if covered != 0 && covered != self.total_size as u64 {
                return Err(ChipDefect::CoverageMismatch { function, covered });
            }
        }
        Ok(())
    }
}
