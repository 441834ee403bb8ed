//! Plan execution
//!
//! Walks the processing units of an [`ActionDescriptor`] block by block,
//! erasing where the write granularity demands it and writing the
//! differing windows, then optionally reads the result back.

use alloc::vec;
use core::fmt;

use log::{debug, error, info, warn};

use super::analyze::{get_next_write, need_erase};
use super::device::FlashDevice;
use super::operations::WriteProgress;
use crate::chip::FlashChip;
use crate::error::{EraseFailure, Error, Mismatch, Result};
use crate::plan::ActionDescriptor;

/// What to do when the controller refuses access to a protected range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorAction {
    /// Skip the affected block and carry on
    #[default]
    Ignore,
    /// Treat it like any other failure
    Abort,
}

/// Execution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecPolicy {
    /// Read back and check after every erase and write
    pub paranoid: bool,
    /// Handling of access-denied errors
    pub access_denied: ErrorAction,
}

impl ExecPolicy {
    /// Check if `err` is absorbed under this policy
    pub fn ignores(&self, err: &Error) -> bool {
        err.is_access_denied() && self.access_denied == ErrorAction::Ignore
    }
}

/// How much to read back after programming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyMode {
    /// No verification
    Off,
    /// Only the ranges of the processing units
    Partial,
    /// The whole chip
    #[default]
    Full,
}

/// Operation during which an execution error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Checking the plan before the chip is touched
    Setup,
    /// Erasing a block
    Erase,
    /// Writing a window
    Write,
    /// Reading back for verification
    Verify,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Erase => write!(f, "erase"),
            Self::Write => write!(f, "write"),
            Self::Verify => write!(f, "verify"),
        }
    }
}

/// Failure while executing a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecError {
    /// Operation that failed
    pub op: OpKind,
    /// Start of the affected range
    pub addr: u32,
    /// Length of the affected range
    pub len: u32,
    /// Underlying device error
    pub cause: Error,
}

impl ExecError {
    /// Create a new execution error
    pub fn new(op: OpKind, addr: u32, len: u32, cause: Error) -> Self {
        Self {
            op,
            addr,
            len,
            cause,
        }
    }
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op == OpKind::Setup {
            return write!(f, "plan setup failed: {}", self.cause);
        }
        write!(
            f,
            "{} of 0x{:08X}-0x{:08X} failed: {}",
            self.op,
            self.addr,
            self.addr.saturating_add(self.len).saturating_sub(1),
            self.cause
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ExecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Counters from executing a plan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Blocks walked
    pub blocks_visited: usize,
    /// Blocks that needed neither erase nor write
    pub blocks_skipped: usize,
    /// Blocks abandoned because access was denied
    pub blocks_denied: usize,
    /// Number of erase operations performed
    pub erases_performed: usize,
    /// Total bytes erased
    pub bytes_erased: usize,
    /// Number of write operations performed
    pub writes_performed: usize,
    /// Total bytes written
    pub bytes_written: usize,
    /// Whether an erase or write was issued at all
    pub content_changed: bool,
}

/// Execution context for one block of a processing unit
#[derive(Debug)]
pub struct WalkInfo<'a> {
    /// What the block currently holds, updated as operations complete
    pub current: &'a mut [u8],
    /// What the block should hold
    pub new: &'a [u8],
    /// Start address of the block
    pub erase_start: u32,
    /// Length of the block
    pub erase_len: u32,
    /// Erase function to use
    pub function: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockOutcome {
    Skipped,
    Erased,
    Written,
    ErasedAndWritten,
}

impl fmt::Display for BlockOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => write!(f, "SKIP"),
            Self::Erased => write!(f, "E"),
            Self::Written => write!(f, "W"),
            Self::ErasedAndWritten => write!(f, "EW"),
        }
    }
}

/// Execute a plan
///
/// `current` is the caller's copy of what the chip holds; it must have the
/// same length as the plan's images and is kept in sync with every
/// completed erase and write. The plan's own images are not touched.
///
/// Access-denied errors are absorbed per block when the policy ignores
/// them. Any other failure stops execution.
pub fn erase_and_write<D, P>(
    device: &mut D,
    chip: &FlashChip,
    plan: &ActionDescriptor<'_>,
    current: &mut [u8],
    policy: &ExecPolicy,
    progress: &mut P,
) -> core::result::Result<ExecStats, ExecError>
where
    D: FlashDevice + ?Sized,
    P: WriteProgress + ?Sized,
{
    let new = plan.new_contents();
    if current.len() != new.len() {
        return Err(ExecError::new(
            OpKind::Setup,
            0,
            0,
            Error::SizeMismatch {
                expected: new.len() as u32,
                actual: current.len(),
            },
        ));
    }

    info!("Erasing and writing flash chip...");
    let mut stats = ExecStats::default();
    progress.executing(plan.units().len(), plan.total_bytes() as usize);
    let mut bytes_done = 0usize;

    for unit in plan.units() {
        for block_start in unit.block_offsets() {
            let range = block_start as usize..(block_start + unit.block_size) as usize;
            let mut info = WalkInfo {
                current: &mut current[range.clone()],
                new: &new[range],
                erase_start: block_start,
                erase_len: unit.block_size,
                function: unit.function,
            };
            stats.blocks_visited += 1;

            let block_end = block_start + unit.block_size - 1;
            match erase_and_write_block(device, chip, &mut info, policy, &mut stats) {
                Ok(BlockOutcome::Skipped) => {
                    stats.blocks_skipped += 1;
                    debug!("0x{:08X}-0x{:08X}: SKIP", block_start, block_end);
                }
                Ok(outcome) => debug!("0x{:08X}-0x{:08X}: {}", block_start, block_end, outcome),
                Err(e) if policy.ignores(&e.cause) => {
                    stats.blocks_denied += 1;
                    warn!("0x{:08X}-0x{:08X}: DENIED, skipping", block_start, block_end);
                }
                Err(e) => {
                    error!("{}", e);
                    return Err(e);
                }
            }

            bytes_done += unit.block_size as usize;
            progress.block_done(bytes_done);
        }
    }

    debug!(
        "{} blocks: {} erases, {} writes, {} skipped, {} denied",
        stats.blocks_visited,
        stats.erases_performed,
        stats.writes_performed,
        stats.blocks_skipped,
        stats.blocks_denied
    );
    Ok(stats)
}

fn erase_and_write_block<D: FlashDevice + ?Sized>(
    device: &mut D,
    chip: &FlashChip,
    info: &mut WalkInfo<'_>,
    policy: &ExecPolicy,
    stats: &mut ExecStats,
) -> core::result::Result<BlockOutcome, ExecError> {
    let granularity = chip.write_granularity;
    let erased_value = chip.erased_value;
    let mut erased = false;

    if need_erase(info.current, info.new, granularity, erased_value) {
        let (start, len) = (info.erase_start, info.erase_len);
        stats.content_changed = true;
        device
            .erase(info.function, start, len)
            .map_err(|cause| ExecError::new(OpKind::Erase, start, len, cause))?;
        if policy.paranoid {
            check_erased_range(device, start, len, erased_value)
                .map_err(|cause| ExecError::new(OpKind::Erase, start, len, cause))?;
        }
        info.current.fill(erased_value);
        stats.erases_performed += 1;
        stats.bytes_erased += len as usize;
        erased = true;
    }

    let mut written = false;
    let mut offset = 0;
    while let Some(window) = get_next_write(info.current, info.new, offset, granularity) {
        let data = &info.new[window.start as usize..window.end() as usize];
        let addr = info.erase_start + window.start;

        stats.content_changed = true;
        device
            .write(addr, data)
            .map_err(|cause| ExecError::new(OpKind::Write, addr, window.len, cause))?;
        if policy.paranoid && !erased {
            verify_range(device, chip, data, addr, policy)
                .map_err(|cause| ExecError::new(OpKind::Write, addr, window.len, cause))?;
        }
        info.current[window.start as usize..window.end() as usize].copy_from_slice(data);

        stats.writes_performed += 1;
        stats.bytes_written += window.len as usize;
        written = true;
        offset = window.end();
    }

    Ok(match (erased, written) {
        (false, false) => BlockOutcome::Skipped,
        (true, false) => BlockOutcome::Erased,
        (false, true) => BlockOutcome::Written,
        (true, true) => BlockOutcome::ErasedAndWritten,
    })
}

/// Read back a freshly erased block and check every byte is erased
fn check_erased_range<D: FlashDevice + ?Sized>(
    device: &mut D,
    start: u32,
    len: u32,
    erased_value: u8,
) -> Result<()> {
    let mut readback = vec![0u8; len as usize];
    device.read(start, &mut readback)?;

    if let Some(pos) = readback.iter().position(|&b| b != erased_value) {
        let addr = start + pos as u32;
        error!(
            "ERASE FAILED at 0x{:08X}! Expected=0x{:02X}, Found=0x{:02X}",
            addr, erased_value, readback[pos]
        );
        return Err(Error::EraseError(EraseFailure::VerifyFailed {
            addr,
            found: readback[pos],
        }));
    }
    Ok(())
}

fn compare_range(want: &[u8], have: &[u8], start: u32) -> Option<Mismatch> {
    let mut first = None;
    let mut failcount = 0u32;

    for (i, (w, h)) in want.iter().zip(have).enumerate() {
        if w != h {
            failcount += 1;
            if first.is_none() {
                first = Some((i, *w, *h));
            }
        }
    }

    first.map(|(i, expected, found)| Mismatch {
        addr: start + i as u32,
        expected,
        found,
        failcount,
    })
}

/// Read back `expected.len()` bytes at `start` and compare
///
/// The range is checked in page-sized chunks. Chunks the device reports
/// as protected are skipped when the policy ignores access-denied errors.
/// In paranoid mode every chunk is read separately and checking stops at
/// the first failing chunk; otherwise the range is read in one go and the
/// failure count covers all of it.
pub fn verify_range<D: FlashDevice + ?Sized>(
    device: &mut D,
    chip: &FlashChip,
    expected: &[u8],
    start: u32,
    policy: &ExecPolicy,
) -> Result<()> {
    if expected.is_empty() {
        return Ok(());
    }

    let chunk_size = (chip.page_size as usize).max(1);
    let mut readback = vec![0u8; expected.len()];

    if !policy.paranoid {
        if let Err(e) = device.read(start, &mut readback) {
            if policy.ignores(&e) {
                warn!(
                    "Could not read 0x{:08X}+{:#x} for verification ({}), ignoring",
                    start,
                    expected.len(),
                    e
                );
                return Ok(());
            }
            return Err(e);
        }
    }

    let mut first: Option<Mismatch> = None;
    let mut failcount = 0u32;

    for (i, (want, have)) in expected
        .chunks(chunk_size)
        .zip(readback.chunks_mut(chunk_size))
        .enumerate()
    {
        let addr = start + (i * chunk_size) as u32;

        if let Err(e) = device.check_access(addr, want.len() as u32) {
            if policy.ignores(&e) {
                debug!("Skipping verification of protected range at 0x{:08X}", addr);
                continue;
            }
            return Err(e);
        }

        if policy.paranoid {
            match device.read(addr, have) {
                Ok(()) => {}
                Err(e) if policy.ignores(&e) => continue,
                Err(e) => return Err(e),
            }
        }

        if let Some(mismatch) = compare_range(want, have, addr) {
            failcount += mismatch.failcount;
            if first.is_none() {
                first = Some(mismatch);
            }
            if policy.paranoid {
                break;
            }
        }
    }

    match first {
        None => Ok(()),
        Some(mismatch) => {
            error!(
                "VERIFY FAILED at 0x{:08X}! Expected=0x{:02X}, Found=0x{:02X}, \
                 failed byte count from 0x{:08X}-0x{:08X}: 0x{:x}",
                mismatch.addr,
                mismatch.expected,
                mismatch.found,
                start,
                start + expected.len() as u32 - 1,
                failcount
            );
            Err(Error::VerifyError(Mismatch {
                failcount,
                ..mismatch
            }))
        }
    }
}

/// Read back what a plan wrote
///
/// [`VerifyMode::Partial`] only checks the ranges of the plan's units.
pub fn verify<D: FlashDevice + ?Sized>(
    device: &mut D,
    chip: &FlashChip,
    plan: &ActionDescriptor<'_>,
    mode: VerifyMode,
    policy: &ExecPolicy,
) -> core::result::Result<(), ExecError> {
    let new = plan.new_contents();

    match mode {
        VerifyMode::Off => Ok(()),
        VerifyMode::Partial => {
            info!("Verifying flash (changed regions only)...");
            for unit in plan.units() {
                let expected = &new[unit.offset as usize..unit.end() as usize];
                verify_range(device, chip, expected, unit.offset, policy)
                    .map_err(|cause| ExecError::new(OpKind::Verify, unit.offset, unit.size(), cause))?;
            }
            Ok(())
        }
        VerifyMode::Full => {
            info!("Verifying flash...");
            verify_range(device, chip, new, 0, policy)
                .map_err(|cause| ExecError::new(OpKind::Verify, 0, new.len() as u32, cause))
        }
    }
}
