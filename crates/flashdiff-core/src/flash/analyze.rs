//! Write-window analysis
//!
//! Decides whether a block needs an erase before it can be rewritten, and
//! finds the contiguous ranges that actually need writing. Both follow the
//! chip's [`WriteGranularity`].

use alloc::vec::Vec;

use crate::chip::WriteGranularity;

/// Check if erasing is needed before writing `want` over `have`
///
/// # Arguments
/// * `have` - Current contents of the region
/// * `want` - Desired contents
/// * `granularity` - Write granularity of the chip
/// * `erased_value` - Value the chip reads as after an erase
///
/// # Returns
/// `true` if erasing is required, `false` if the write can proceed without erase
pub fn need_erase(have: &[u8], want: &[u8], granularity: WriteGranularity, erased_value: u8) -> bool {
    debug_assert_eq!(have.len(), want.len());

    match granularity {
        WriteGranularity::Bit => {
            // Only 1->0 is possible; any bit going 0->1 needs an erase
            have.iter().zip(want).any(|(h, w)| (h & w) != *w)
        }
        WriteGranularity::Byte => have
            .iter()
            .zip(want)
            .any(|(h, w)| h != w && *h != erased_value),
        WriteGranularity::ByteImplicitErase => false,
        _ => {
            // A changed chunk can only be programmed if it is fully erased.
            // A trailing partial chunk is checked like a full one.
            let stride = granularity.stride();
            have.chunks(stride)
                .zip(want.chunks(stride))
                .any(|(h, w)| h != w && h.iter().any(|&b| b != erased_value))
        }
    }
}

/// A contiguous range of bytes that needs to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRange {
    /// Start offset within the compared buffers
    pub start: u32,
    /// Length in bytes
    pub len: u32,
}

impl WriteRange {
    /// Offset one past the last byte of the range
    pub fn end(&self) -> u32 {
        self.start + self.len
    }
}

/// Find the next contiguous range of changed chunks
///
/// Starting from `offset`, the buffers are compared in chunks of the
/// granularity's stride. The returned range starts at the first differing
/// chunk and extends over all directly following differing chunks. The last
/// chunk may be shorter than the stride.
///
/// # Returns
/// `Some(WriteRange)` if there are changes, `None` if no more changes from `offset`
pub fn get_next_write(
    have: &[u8],
    want: &[u8],
    offset: u32,
    granularity: WriteGranularity,
) -> Option<WriteRange> {
    debug_assert_eq!(have.len(), want.len());

    let stride = granularity.stride();
    let len = have.len().min(want.len());
    let mut pos = offset as usize;
    let mut start = None;

    while pos < len {
        let end = (pos + stride).min(len);
        let differs = have[pos..end] != want[pos..end];
        match (differs, start) {
            (true, None) => start = Some(pos),
            (false, Some(_)) => break,
            _ => {}
        }
        pos = end;
    }

    start.map(|start| WriteRange {
        start: start as u32,
        len: (pos - start) as u32,
    })
}

/// Get all write ranges for the given granularity
pub fn get_all_write_ranges(
    have: &[u8],
    want: &[u8],
    granularity: WriteGranularity,
) -> Vec<WriteRange> {
    let mut ranges = Vec::new();
    let mut offset = 0u32;

    while let Some(range) = get_next_write(have, want, offset, granularity) {
        ranges.push(range);
        offset = range.end();
    }

    ranges
}
