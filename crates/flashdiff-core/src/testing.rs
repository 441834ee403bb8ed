//! Shared helpers for unit tests

use alloc::vec::Vec;
use core::ops::Range;

use crate::chip::{EraseBlock, FlashChip, WriteGranularity};
use crate::error::{Error, Result};
use crate::flash::FlashDevice;

pub const KIB: u32 = 1024;

/// 64 KiB chip with 4K, 32K and 64K erase functions
pub fn small_chip(granularity: WriteGranularity) -> FlashChip {
    FlashChip::new("Test", "64K", 64 * KIB)
        .with_granularity(granularity)
        .with_erase_block(EraseBlock::uniform(4 * KIB, 16))
        .with_erase_block(EraseBlock::uniform(32 * KIB, 2))
        .with_erase_block(EraseBlock::uniform(64 * KIB, 1))
}

/// A mock device that simulates flash memory for testing
///
/// - Erase operations set blocks to the erased value
/// - Write operations can only move bits away from the erased value,
///   except on implicit-erase chips
/// - Every operation is recorded
pub struct MockFlash {
    chip: FlashChip,
    /// Simulated flash memory contents
    pub memory: Vec<u8>,
    /// Erase operations: (function, address, length)
    pub erases: Vec<(usize, u32, u32)>,
    /// Write operations: (address, length)
    pub writes: Vec<(u32, usize)>,
    /// Read operations: (address, length)
    pub reads: Vec<(u32, usize)>,
    /// Write-protected range
    pub protected: Option<Range<u32>>,
    /// Writes covering this address fail
    pub fail_write_at: Option<u32>,
    /// This byte reads as zero after every erase
    pub stuck_zero: Option<u32>,
    /// Erase function the controller refuses
    pub refused_function: Option<usize>,
    /// All reads fail
    pub read_broken: bool,
}

impl MockFlash {
    pub fn new(chip: FlashChip, contents: &[u8]) -> Self {
        Self {
            chip,
            memory: contents.to_vec(),
            erases: Vec::new(),
            writes: Vec::new(),
            reads: Vec::new(),
            protected: None,
            fail_write_at: None,
            stuck_zero: None,
            refused_function: None,
            read_broken: false,
        }
    }

    fn check_bounds(&self, addr: u32, len: usize) -> Result<Range<usize>> {
        let start = addr as usize;
        let end = start + len;
        if end > self.memory.len() {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(start..end)
    }

    fn is_protected(&self, addr: u32, len: u32) -> bool {
        self.protected
            .as_ref()
            .is_some_and(|p| addr < p.end && p.start < addr + len)
    }

    fn check_function(&self, function: usize) -> Result<&EraseBlock> {
        if self.refused_function == Some(function) {
            return Err(Error::EraserNotSupported { function });
        }
        self.chip
            .erase_blocks
            .get(function)
            .filter(|eb| eb.is_usable())
            .ok_or(Error::EraserNotSupported { function })
    }
}

impl FlashDevice for MockFlash {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        if self.read_broken {
            return Err(Error::ReadError);
        }
        let range = self.check_bounds(addr, buf.len())?;
        self.reads.push((addr, buf.len()));
        buf.copy_from_slice(&self.memory[range]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let range = self.check_bounds(addr, data.len())?;
        if self.is_protected(addr, data.len() as u32) {
            return Err(Error::AccessDenied { addr });
        }
        if self
            .fail_write_at
            .is_some_and(|a| range.contains(&(a as usize)))
        {
            return Err(Error::WriteError { addr });
        }

        let implicit = self.chip.write_granularity == WriteGranularity::ByteImplicitErase;
        for (cell, &byte) in self.memory[range].iter_mut().zip(data) {
            *cell = if implicit { byte } else { *cell & byte };
        }
        self.writes.push((addr, data.len()));
        Ok(())
    }

    fn erase(&mut self, function: usize, addr: u32, len: u32) -> Result<()> {
        let eb = self.check_function(function)?;
        if len == 0 || eb.block_size_at_offset(addr) != Some(len) || addr % len != 0 {
            return Err(Error::InvalidAlignment);
        }
        let range = self.check_bounds(addr, len as usize)?;
        if self.is_protected(addr, len) {
            return Err(Error::AccessDenied { addr });
        }

        let erased_value = self.chip.erased_value;
        self.memory[range.clone()].fill(erased_value);
        if let Some(stuck) = self.stuck_zero.filter(|a| range.contains(&(*a as usize))) {
            self.memory[stuck as usize] = 0x00;
        }
        self.erases.push((function, addr, len));
        Ok(())
    }

    fn erase_dry_run(&mut self, function: usize, _addr: u32, _len: u32) -> Result<()> {
        self.check_function(function).map(|_| ())
    }

    fn check_access(&mut self, addr: u32, len: u32) -> Result<()> {
        if self.is_protected(addr, len) {
            return Err(Error::AccessDenied { addr });
        }
        Ok(())
    }
}
