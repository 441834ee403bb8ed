//! flashdiff-dummy - In-memory flash emulator for testing
//!
//! This crate provides a dummy flash programmer that emulates a flash chip
//! in memory. It follows the chip description it is given: erases must
//! match one block of the named erase function, writes can only move bits
//! away from the erased value (unless the chip erases implicitly), and
//! every erase and write waits for a simulated busy flag.
//!
//! Faults can be injected through [`DummyConfig`]: write-protected ranges,
//! erase functions the controller refuses, stuck bits and a busy flag that
//! never clears.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

use flashdiff_core::chip::{EraseBlock, FlashChip, WriteGranularity};
use flashdiff_core::error::{Error, Result};
use flashdiff_core::flash::poll::{wait_ready, PollConfig, StatusPoll};
use flashdiff_core::flash::FlashDevice;
use log::trace;

/// Configuration for the dummy flash
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Chip being emulated
    pub chip: FlashChip,
    /// Ranges the controller refuses to erase or write
    pub protected: Vec<Range<u32>>,
    /// Erase functions the controller refuses, even in a dry run
    pub restricted_functions: Vec<usize>,
    /// Bits stuck at zero: (address, mask)
    pub stuck_bits: Vec<(u32, u8)>,
    /// Busy polls after each erase or write
    pub busy_polls: u32,
    /// An erase or write touching this address never completes
    pub stuck_busy_at: Option<u32>,
}

impl DummyConfig {
    /// Emulate `chip` without any faults
    pub fn new(chip: FlashChip) -> Self {
        Self {
            chip,
            protected: Vec::new(),
            restricted_functions: Vec::new(),
            stuck_bits: Vec::new(),
            busy_polls: 0,
            stuck_busy_at: None,
        }
    }
}

impl Default for DummyConfig {
    /// 1 MiB chip with 4K, 32K, 64K and whole-chip erase
    fn default() -> Self {
        const SIZE: u32 = 1024 * 1024;
        Self::new(
            FlashChip::new("Emulated", "EMU1M", SIZE)
                .with_erase_block(EraseBlock::uniform(4 * 1024, SIZE / (4 * 1024)))
                .with_erase_block(EraseBlock::uniform(32 * 1024, SIZE / (32 * 1024)))
                .with_erase_block(EraseBlock::uniform(64 * 1024, SIZE / (64 * 1024)))
                .with_erase_block(EraseBlock::uniform(SIZE, 1)),
        )
    }
}

/// A recorded device operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Read of `len` bytes at `addr`
    Read {
        /// Start address
        addr: u32,
        /// Length in bytes
        len: usize,
    },
    /// Write of `len` bytes at `addr`
    Write {
        /// Start address
        addr: u32,
        /// Length in bytes
        len: usize,
    },
    /// Erase of one block
    Erase {
        /// Erase function index
        function: usize,
        /// Block address
        addr: u32,
        /// Block length
        len: u32,
    },
}

/// Dummy flash programmer
///
/// Emulates a flash chip in memory for testing purposes.
pub struct DummyFlash {
    config: DummyConfig,
    data: Vec<u8>,
    log: Vec<Operation>,
    busy_remaining: u32,
    stuck_busy: bool,
    elapsed_us: u64,
}

impl DummyFlash {
    /// Create a new dummy flash, initially erased
    pub fn new(config: DummyConfig) -> Self {
        let data = vec![config.chip.erased_value; config.chip.total_size as usize];
        Self {
            config,
            data,
            log: Vec::new(),
            busy_remaining: 0,
            stuck_busy: false,
            elapsed_us: 0,
        }
    }

    /// Create a new dummy flash with default configuration
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Create a dummy flash with pre-filled data
    pub fn with_data(config: DummyConfig, initial_data: &[u8]) -> Self {
        let mut flash = Self::new(config);
        let len = core::cmp::min(initial_data.len(), flash.data.len());
        flash.data[..len].copy_from_slice(&initial_data[..len]);
        flash
    }

    /// Get a reference to the flash data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the flash data
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Get the emulated chip
    pub fn chip(&self) -> &FlashChip {
        &self.config.chip
    }

    /// Operations performed so far
    pub fn log(&self) -> &[Operation] {
        &self.log
    }

    /// Forget the recorded operations
    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    /// Number of erase operations performed
    pub fn erase_count(&self) -> usize {
        self.log
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }

    /// Number of write operations performed
    pub fn write_count(&self) -> usize {
        self.log
            .iter()
            .filter(|op| matches!(op, Operation::Write { .. }))
            .count()
    }

    /// Simulated time spent waiting for the chip, in microseconds
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }

    fn range(&self, addr: u32, len: usize) -> Result<Range<usize>> {
        let start = addr as usize;
        let end = start.checked_add(len).ok_or(Error::AddressOutOfBounds)?;
        if end > self.data.len() {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(start..end)
    }

    fn erase_block(&self, function: usize) -> Result<&EraseBlock> {
        if self.config.restricted_functions.contains(&function) {
            return Err(Error::EraserNotSupported { function });
        }
        self.config
            .chip
            .erase_blocks()
            .get(function)
            .filter(|eb| eb.is_usable())
            .ok_or(Error::EraserNotSupported { function })
    }

    fn apply_stuck_bits(&mut self, range: &Range<usize>) {
        for &(addr, mask) in &self.config.stuck_bits {
            if let Some(cell) = self.data.get_mut(addr as usize) {
                if range.contains(&(addr as usize)) {
                    *cell &= !mask;
                }
            }
        }
    }

    fn finish_operation(&mut self, range: Range<usize>, poll: PollConfig) -> Result<()> {
        self.apply_stuck_bits(&range);
        self.busy_remaining = self.config.busy_polls;
        if self
            .config
            .stuck_busy_at
            .is_some_and(|a| range.contains(&(a as usize)))
        {
            self.stuck_busy = true;
        }
        wait_ready(self, poll)
    }
}

/// Program `byte` into `cell`: only bits still at their erased state change
fn program(cell: u8, byte: u8, erased_value: u8) -> u8 {
    erased_value ^ ((erased_value ^ cell) | (erased_value ^ byte))
}

impl FlashDevice for DummyFlash {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        self.log.push(Operation::Read {
            addr,
            len: buf.len(),
        });
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let range = self.range(addr, data.len())?;
        self.check_access(addr, data.len() as u32)?;
        trace!("write 0x{:08X}+{:#x}", addr, data.len());

        let erased_value = self.config.chip.erased_value;
        let implicit = self.config.chip.write_granularity == WriteGranularity::ByteImplicitErase;
        for (cell, &byte) in self.data[range.clone()].iter_mut().zip(data) {
            *cell = if implicit {
                byte
            } else {
                program(*cell, byte, erased_value)
            };
        }
        self.log.push(Operation::Write {
            addr,
            len: data.len(),
        });

        self.finish_operation(range, PollConfig::PAGE_PROGRAM)
    }

    fn erase(&mut self, function: usize, addr: u32, len: u32) -> Result<()> {
        let eb = self.erase_block(function)?;
        if len == 0 || eb.block_size_at_offset(addr) != Some(len) || addr % len != 0 {
            return Err(Error::InvalidAlignment);
        }
        let range = self.range(addr, len as usize)?;
        self.check_access(addr, len)?;
        trace!("erase 0x{:08X}+{:#x} with function {}", addr, len, function);

        self.data[range.clone()].fill(self.config.chip.erased_value);
        self.log.push(Operation::Erase {
            function,
            addr,
            len,
        });

        self.finish_operation(range, PollConfig::BLOCK_ERASE)
    }

    fn erase_dry_run(&mut self, function: usize, _addr: u32, _len: u32) -> Result<()> {
        self.erase_block(function).map(|_| ())
    }

    fn check_access(&mut self, addr: u32, len: u32) -> Result<()> {
        let end = addr.saturating_add(len);
        if self
            .config
            .protected
            .iter()
            .any(|p| addr < p.end && p.start < end)
        {
            return Err(Error::AccessDenied { addr });
        }
        Ok(())
    }
}

impl StatusPoll for DummyFlash {
    fn is_busy(&mut self) -> Result<bool> {
        if self.stuck_busy {
            return Ok(true);
        }
        if self.busy_remaining > 0 {
            self.busy_remaining -= 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn delay_us(&mut self, us: u32) {
        // No real delay for in-memory operations, just account for it
        self.elapsed_us += us as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashdiff_core::error::{EraseFailure, Mismatch};
    use flashdiff_core::flash::{
        erase_image, read_image, write_image, ErrorAction, ExecPolicy, FailureAssessment,
        NoProgress, OldContents, OpKind, OperationError, VerifyMode, WriteOptions,
    };
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const KIB: u32 = 1024;

    fn config_with(granularity: WriteGranularity) -> DummyConfig {
        let mut config = DummyConfig::default();
        config.chip.write_granularity = granularity;
        config
    }

    fn random_image(rng: &mut StdRng, size: usize) -> Vec<u8> {
        let mut image = vec![0u8; size];
        rng.fill(&mut image[..]);
        image
    }

    /// Scatter erased, zeroed and random runs over a copy of `image`
    fn mutate(rng: &mut StdRng, image: &[u8], erased_value: u8) -> Vec<u8> {
        let mut new = image.to_vec();
        for _ in 0..24 {
            let start = rng.gen_range(0..new.len() - 4096);
            let len = rng.gen_range(1..4096);
            let run = &mut new[start..start + len];
            match rng.gen_range(0..3) {
                0 => run.fill(erased_value),
                1 => run.fill(0x00),
                _ => rng.fill(run),
            }
        }
        // One fully rewritten 64K block so coarse erasers get picked too
        let block = rng.gen_range(0..new.len() / (64 * KIB as usize)) * 64 * KIB as usize;
        rng.fill(&mut new[block..block + 64 * KIB as usize]);
        new
    }

    #[test]
    fn test_read_write() {
        let mut flash = DummyFlash::new_default();

        let data = [0x12, 0x34, 0x56, 0x78];
        flash.write(0x100, &data).unwrap();

        let mut buf = [0u8; 4];
        flash.read(0x100, &mut buf).unwrap();
        assert_eq!(buf, data);

        // Programming can only clear bits
        flash.write(0x100, &[0xF0; 4]).unwrap();
        flash.read(0x100, &mut buf).unwrap();
        assert_eq!(buf, [0x10, 0x30, 0x50, 0x70]);

        assert_eq!(
            flash.log(),
            [
                Operation::Write { addr: 0x100, len: 4 },
                Operation::Read { addr: 0x100, len: 4 },
                Operation::Write { addr: 0x100, len: 4 },
                Operation::Read { addr: 0x100, len: 4 },
            ]
        );
    }

    #[test]
    fn test_erase() {
        let mut flash = DummyFlash::new_default();
        flash.write(0x1000, &[0x00; 16]).unwrap();

        flash.erase(0, 0x1000, 4 * KIB).unwrap();
        assert!(flash.data()[0x1000..0x2000].iter().all(|&b| b == 0xFF));

        // Size must match the function, address must be aligned
        assert_eq!(flash.erase(0, 0x1000, 32 * KIB), Err(Error::InvalidAlignment));
        assert_eq!(flash.erase(1, 0x1000, 32 * KIB), Err(Error::InvalidAlignment));
        assert_eq!(flash.erase(0, 0x1000, 0), Err(Error::InvalidAlignment));
        assert_eq!(
            flash.erase(7, 0, 4 * KIB),
            Err(Error::EraserNotSupported { function: 7 })
        );
        assert_eq!(flash.erase_count(), 1);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut flash = DummyFlash::new_default();
        let size = flash.chip().total_size;
        let mut buf = [0u8; 2];
        assert_eq!(flash.read(size - 1, &mut buf), Err(Error::AddressOutOfBounds));
        assert_eq!(flash.write(size, &[0]), Err(Error::AddressOutOfBounds));
    }

    #[test]
    fn test_zero_erased_value() {
        let mut config = DummyConfig::default();
        config.chip.erased_value = 0x00;
        let mut flash = DummyFlash::new(config);
        assert!(flash.data().iter().all(|&b| b == 0x00));

        // Programming can only set bits
        flash.write(0, &[0x0F]).unwrap();
        flash.write(0, &[0xF0]).unwrap();
        assert_eq!(flash.data()[0], 0xFF);

        flash.erase(0, 0, 4 * KIB).unwrap();
        assert_eq!(flash.data()[0], 0x00);
    }

    #[test]
    fn test_implicit_erase_writes_directly() {
        let mut flash = DummyFlash::new(config_with(WriteGranularity::ByteImplicitErase));
        flash.write(0, &[0x00]).unwrap();
        flash.write(0, &[0xA5]).unwrap();
        assert_eq!(flash.data()[0], 0xA5);
    }

    #[test]
    fn test_protected_range() {
        let mut config = DummyConfig::default();
        config.protected.push(0x8000..0x9000);
        let mut flash = DummyFlash::new(config);

        assert_eq!(
            flash.write(0x8800, &[0]),
            Err(Error::AccessDenied { addr: 0x8800 })
        );
        assert_eq!(
            flash.erase(2, 0, 64 * KIB),
            Err(Error::AccessDenied { addr: 0 })
        );
        assert_eq!(flash.check_access(0x7000, 0x1000), Ok(()));
        assert_eq!(flash.check_access(0x9000, 0x1000), Ok(()));
        assert!(flash.check_access(0x7000, 0x1001).is_err());
        flash.erase(0, 0x7000, 4 * KIB).unwrap();
    }

    #[test]
    fn test_restricted_function() {
        let mut config = DummyConfig::default();
        config.restricted_functions.push(3);
        let mut flash = DummyFlash::new(config);
        let size = flash.chip().total_size;

        assert_eq!(
            flash.erase_dry_run(3, 0, size),
            Err(Error::EraserNotSupported { function: 3 })
        );
        assert_eq!(
            flash.erase(3, 0, size),
            Err(Error::EraserNotSupported { function: 3 })
        );
        assert_eq!(flash.erase_dry_run(2, 0, size), Ok(()));
    }

    #[test]
    fn test_busy_polls() {
        let mut config = DummyConfig::default();
        config.busy_polls = 3;
        let mut flash = DummyFlash::new(config);

        flash.write(0, &[0x00]).unwrap();
        // 10 + 20 + 40 us with the page program schedule
        assert_eq!(flash.elapsed_us(), 70);
    }

    #[test]
    fn test_stuck_busy_times_out() {
        let mut config = DummyConfig::default();
        config.stuck_busy_at = Some(0x2000);
        let mut flash = DummyFlash::new(config);

        flash.write(0x1000, &[0x00]).unwrap();
        assert_eq!(flash.write(0x2000, &[0x00]), Err(Error::Timeout));
        // Once stuck, the chip never becomes ready again
        assert_eq!(flash.erase(0, 0x4000, 4 * KIB), Err(Error::Timeout));
        assert!(flash.elapsed_us() > 0);
    }

    #[test]
    fn test_round_trip_all_granularities() {
        let granularities = [
            WriteGranularity::Bit,
            WriteGranularity::Byte,
            WriteGranularity::Bytes128,
            WriteGranularity::Bytes256,
            WriteGranularity::Bytes264,
            WriteGranularity::Bytes512,
            WriteGranularity::Bytes528,
            WriteGranularity::Bytes1024,
            WriteGranularity::Bytes1056,
            WriteGranularity::ByteImplicitErase,
        ];
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for granularity in granularities {
            let config = config_with(granularity);
            let chip = config.chip.clone();
            let old = random_image(&mut rng, chip.total_size as usize);
            let new = mutate(&mut rng, &old, chip.erased_value);

            let mut flash = DummyFlash::with_data(config, &old);
            let stats = write_image(&mut flash, &chip, &new, &WriteOptions::default(), &mut NoProgress)
                .unwrap_or_else(|e| panic!("{}: {}", granularity, e));
            assert_eq!(flash.data(), &new[..], "{}", granularity);
            assert!(stats.verified);

            // Nothing left to do the second time
            flash.clear_log();
            let stats = write_image(&mut flash, &chip, &new, &WriteOptions::default(), &mut NoProgress)
                .unwrap();
            assert_eq!(stats.units, 0);
            assert_eq!(flash.erase_count(), 0);
            assert_eq!(flash.write_count(), 0);
        }
    }

    #[test]
    fn test_round_trip_zero_erased_value() {
        let mut config = DummyConfig::default();
        config.chip.erased_value = 0x00;
        let chip = config.chip.clone();

        let mut rng = StdRng::seed_from_u64(7);
        let old = random_image(&mut rng, chip.total_size as usize);
        let new = mutate(&mut rng, &old, 0x00);

        let mut flash = DummyFlash::with_data(config, &old);
        write_image(&mut flash, &chip, &new, &WriteOptions::default(), &mut NoProgress).unwrap();
        assert_eq!(flash.data(), &new[..]);
    }

    #[test]
    fn test_round_trip_from_reference_image() {
        let config = DummyConfig::default();
        let chip = config.chip.clone();

        let mut rng = StdRng::seed_from_u64(42);
        let old = random_image(&mut rng, chip.total_size as usize);
        let new = mutate(&mut rng, &old, chip.erased_value);

        let mut flash = DummyFlash::with_data(config, &old);
        let options = WriteOptions {
            old: OldContents::Reference(&old),
            verify: VerifyMode::Partial,
            ..Default::default()
        };
        write_image(&mut flash, &chip, &new, &options, &mut NoProgress).unwrap();
        assert_eq!(flash.data(), &new[..]);
    }

    #[test]
    fn test_erase_whole_chip() {
        let config = DummyConfig::default();
        let chip = config.chip.clone();
        let mut rng = StdRng::seed_from_u64(1);
        let old = random_image(&mut rng, chip.total_size as usize);

        let mut flash = DummyFlash::with_data(config, &old);
        let options = WriteOptions {
            old: OldContents::NoDiff,
            ..Default::default()
        };
        erase_image(&mut flash, &chip, &options, &mut NoProgress).unwrap();

        assert!(flash.data().iter().all(|&b| b == 0xFF));
        assert!(flash.log().contains(&Operation::Erase {
            function: 3,
            addr: 0,
            len: chip.total_size
        }));
        assert_eq!(flash.erase_count(), 1);
    }

    #[test]
    fn test_probe_skips_restricted_function() {
        let mut config = DummyConfig::default();
        config.restricted_functions.push(3);
        let chip = config.chip.clone();
        let mut flash = DummyFlash::with_data(config, &vec![0x00; chip.total_size as usize]);

        let options = WriteOptions {
            old: OldContents::NoDiff,
            probe_erasers: true,
            ..Default::default()
        };
        erase_image(&mut flash, &chip, &options, &mut NoProgress).unwrap();

        assert!(flash.data().iter().all(|&b| b == 0xFF));
        assert_eq!(flash.erase_count(), 16);
        assert!(flash
            .log()
            .iter()
            .all(|op| !matches!(op, Operation::Erase { function, .. } if *function != 2)));
    }

    #[test]
    fn test_unprobed_restricted_function_fails() {
        let mut config = DummyConfig::default();
        config.restricted_functions.push(3);
        let chip = config.chip.clone();
        let mut flash = DummyFlash::new(config);

        let options = WriteOptions {
            old: OldContents::NoDiff,
            ..Default::default()
        };
        let err = erase_image(&mut flash, &chip, &options, &mut NoProgress).unwrap_err();

        match err {
            OperationError::Execute { error, assessment } => {
                assert_eq!(error.op, OpKind::Erase);
                assert_eq!(error.cause, Error::EraserNotSupported { function: 3 });
                assert_eq!(assessment, FailureAssessment::Unknown);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_protected_block_skipped() {
        let mut config = DummyConfig::default();
        config.protected.push(0x10000..0x11000);
        let chip = config.chip.clone();
        let mut flash = DummyFlash::new(config);

        let mut new = vec![0xFF; chip.total_size as usize];
        new[0x10000..0x10010].fill(0x00);
        new[0x20000] = 0x00;

        let stats = write_image(&mut flash, &chip, &new, &WriteOptions::default(), &mut NoProgress)
            .unwrap();

        assert_eq!(stats.blocks_denied, 1);
        assert!(stats.verified);
        assert_eq!(flash.data()[0x10000], 0xFF);
        assert_eq!(flash.data()[0x20000], 0x00);
    }

    #[test]
    fn test_protected_block_aborts() {
        let mut config = DummyConfig::default();
        config.protected.push(0x10000..0x11000);
        let chip = config.chip.clone();
        let mut flash = DummyFlash::new(config);

        let mut new = vec![0xFF; chip.total_size as usize];
        new[0x10000..0x10010].fill(0x00);
        new[0x20000] = 0x00;

        let options = WriteOptions {
            policy: ExecPolicy {
                access_denied: ErrorAction::Abort,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = write_image(&mut flash, &chip, &new, &options, &mut NoProgress).unwrap_err();

        match err {
            OperationError::Execute { error, assessment } => {
                assert_eq!(error.op, OpKind::Write);
                assert_eq!(error.cause, Error::AccessDenied { addr: 0x10000 });
                assert_eq!(assessment, FailureAssessment::NothingChanged);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!err.is_dangerous());
        assert_eq!(flash.data()[0x20000], 0xFF);
    }

    #[test]
    fn test_stuck_bit_fails_verification() {
        let mut config = DummyConfig::default();
        config.stuck_bits.push((0x2000, 0x01));
        let chip = config.chip.clone();

        let mut old = vec![0xFF; chip.total_size as usize];
        old[0x2000] = 0x00;
        let new = vec![0xFF; chip.total_size as usize];

        let mut flash = DummyFlash::with_data(config, &old);
        let err = write_image(&mut flash, &chip, &new, &WriteOptions::default(), &mut NoProgress)
            .unwrap_err();

        match err {
            OperationError::Verify(e) => assert_eq!(
                e.cause,
                Error::VerifyError(Mismatch {
                    addr: 0x2000,
                    expected: 0xFF,
                    found: 0xFE,
                    failcount: 1,
                })
            ),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_stuck_bit_caught_by_paranoid_erase() {
        let mut config = DummyConfig::default();
        config.stuck_bits.push((0x2000, 0x01));
        let chip = config.chip.clone();

        let mut old = vec![0xFF; chip.total_size as usize];
        old[0x2000] = 0x00;
        let new = vec![0xFF; chip.total_size as usize];

        let mut flash = DummyFlash::with_data(config, &old);
        let options = WriteOptions {
            policy: ExecPolicy {
                paranoid: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = write_image(&mut flash, &chip, &new, &options, &mut NoProgress).unwrap_err();

        match err {
            OperationError::Execute { error, assessment } => {
                assert_eq!(error.op, OpKind::Erase);
                assert_eq!(
                    error.cause,
                    Error::EraseError(EraseFailure::VerifyFailed {
                        addr: 0x2000,
                        found: 0xFE
                    })
                );
                assert_eq!(assessment, FailureAssessment::PartiallyWritten);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_timeout_during_write() {
        let mut config = DummyConfig::default();
        config.stuck_busy_at = Some(0x3000);
        let chip = config.chip.clone();
        let mut flash = DummyFlash::new(config);

        let mut new = vec![0xFF; chip.total_size as usize];
        new[0x3000] = 0x00;

        let err = write_image(&mut flash, &chip, &new, &WriteOptions::default(), &mut NoProgress)
            .unwrap_err();

        match err {
            OperationError::Execute { error, assessment } => {
                assert_eq!(error.op, OpKind::Write);
                assert_eq!(error.cause, Error::Timeout);
                assert_eq!(assessment, FailureAssessment::PartiallyWritten);
            }
            other => panic!("unexpected error {:?}", other),
        }
        // Reads still work on a stuck chip
        assert_eq!(read_image(&mut flash, &chip, &mut NoProgress).unwrap(), new);
    }
}
