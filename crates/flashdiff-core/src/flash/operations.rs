//! High-level flash operations
//!
//! Read the chip, plan, execute and verify in one call. These are what a
//! front end normally uses; the lower-level pieces live in
//! [`plan`](crate::plan) and the executor.

use alloc::borrow::Cow;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use log::{error, info};

use super::device::FlashDevice;
use super::executor::{self, ExecError, ExecPolicy, ExecStats, OpKind, VerifyMode};
use super::recovery::{assess_failure, FailureAssessment};
use crate::chip::FlashChip;
use crate::error::{Error, Result};
use crate::plan::{self, AllowAll, DryRunFilter, ExtentMode};

/// Chunk size for reading the chip
pub const READ_CHUNK_SIZE: usize = 4096;

/// Callback for progress reporting during flash operations
pub trait WriteProgress {
    /// Called when starting to read current flash contents
    fn reading(&mut self, total_bytes: usize);

    /// Called to update read progress
    fn read_progress(&mut self, bytes_read: usize);

    /// Called when starting to execute a plan
    fn executing(&mut self, units: usize, total_bytes: usize);

    /// Called after each block of the plan has been processed
    fn block_done(&mut self, bytes_done: usize);

    /// Called when starting verification
    fn verifying(&mut self, total_bytes: usize);

    /// Called when the operation is complete
    fn complete(&mut self, stats: &WriteStats);
}

/// A no-op progress reporter
pub struct NoProgress;

impl WriteProgress for NoProgress {
    fn reading(&mut self, _total_bytes: usize) {}
    fn read_progress(&mut self, _bytes_read: usize) {}
    fn executing(&mut self, _units: usize, _total_bytes: usize) {}
    fn block_done(&mut self, _bytes_done: usize) {}
    fn verifying(&mut self, _total_bytes: usize) {}
    fn complete(&mut self, _stats: &WriteStats) {}
}

/// Statistics from a write or erase operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteStats {
    /// Number of processing units in the plan
    pub units: usize,
    /// Number of bytes that were different
    pub bytes_changed: usize,
    /// Number of erase operations performed
    pub erases_performed: usize,
    /// Total bytes erased
    pub bytes_erased: usize,
    /// Number of write operations performed
    pub writes_performed: usize,
    /// Total bytes written
    pub bytes_written: usize,
    /// Blocks skipped because access was denied
    pub blocks_denied: usize,
    /// Whether any flash operations were performed
    pub flash_modified: bool,
    /// Whether the result was read back and matched
    pub verified: bool,
}

impl WriteStats {
    fn record(&mut self, exec: &ExecStats) {
        self.erases_performed = exec.erases_performed;
        self.bytes_erased = exec.bytes_erased;
        self.writes_performed = exec.writes_performed;
        self.bytes_written = exec.bytes_written;
        self.blocks_denied = exec.blocks_denied;
        self.flash_modified = exec.content_changed;
    }
}

/// Where the old contents for diffing come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OldContents<'a> {
    /// Read the chip
    #[default]
    ReadChip,
    /// Trust a caller-supplied image of the chip contents
    Reference(&'a [u8]),
    /// Don't diff. A write assumes the chip is erased, an erase assumes
    /// nothing is, so the whole chip gets processed.
    NoDiff,
}

/// Options for [`write_image`] and [`erase_image`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions<'a> {
    /// Source of the old contents
    pub old: OldContents<'a>,
    /// Verification after programming
    pub verify: VerifyMode,
    /// Execution policy
    pub policy: ExecPolicy,
    /// Ask the device which erase functions it accepts before planning
    pub probe_erasers: bool,
}

/// Failure of a high-level operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// Reading the current contents failed; the chip was not touched
    Read(Error),
    /// No plan could be built; the chip was not touched
    Plan(Error),
    /// Erase/write failed part way
    Execute {
        /// What failed
        error: ExecError,
        /// What the chip looked like afterwards
        assessment: FailureAssessment,
    },
    /// Programming completed but the contents do not match
    Verify(ExecError),
}

impl OperationError {
    /// Check if the chip may have been left in an unknown state
    pub fn is_dangerous(&self) -> bool {
        match self {
            Self::Read(_) | Self::Plan(_) => false,
            Self::Execute { assessment, .. } => assessment.is_dangerous(),
            Self::Verify(_) => true,
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(e) => write!(f, "failed to read chip: {}", e),
            Self::Plan(e) => write!(f, "failed to plan: {}", e),
            Self::Execute { error, .. } => write!(f, "{}", error),
            Self::Verify(e) => write!(f, "verification failed: {}", e),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for OperationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read(e) | Self::Plan(e) => Some(e),
            Self::Execute { error, .. } | Self::Verify(error) => Some(error),
        }
    }
}

fn check_size(chip: &FlashChip, image: &[u8]) -> core::result::Result<(), OperationError> {
    if image.len() != chip.total_size as usize {
        return Err(OperationError::Plan(Error::SizeMismatch {
            expected: chip.total_size,
            actual: image.len(),
        }));
    }
    Ok(())
}

/// Read the whole chip into `buf`
pub fn read_chip<D, P>(device: &mut D, buf: &mut [u8], progress: &mut P) -> Result<()>
where
    D: FlashDevice + ?Sized,
    P: WriteProgress + ?Sized,
{
    progress.reading(buf.len());

    let mut bytes_read = 0;
    for chunk in buf.chunks_mut(READ_CHUNK_SIZE) {
        device.read(bytes_read as u32, chunk)?;
        bytes_read += chunk.len();
        progress.read_progress(bytes_read);
    }
    Ok(())
}

/// Read the whole chip
pub fn read_image<D, P>(device: &mut D, chip: &FlashChip, progress: &mut P) -> Result<Vec<u8>>
where
    D: FlashDevice + ?Sized,
    P: WriteProgress + ?Sized,
{
    let mut image = vec![0u8; chip.total_size as usize];
    read_chip(device, &mut image, progress)?;
    Ok(image)
}

/// Program `new` into the chip
///
/// The old contents come from `options.old`. Only blocks that differ are
/// erased and written. If execution fails the chip is read back and the
/// damage is assessed. Verification is skipped when nothing was changed.
pub fn write_image<D, P>(
    device: &mut D,
    chip: &FlashChip,
    new: &[u8],
    options: &WriteOptions<'_>,
    progress: &mut P,
) -> core::result::Result<WriteStats, OperationError>
where
    D: FlashDevice + ?Sized,
    P: WriteProgress + ?Sized,
{
    check_size(chip, new)?;

    let (old, mode) = match options.old {
        OldContents::ReadChip => (
            Cow::Owned(read_image(device, chip, progress).map_err(OperationError::Read)?),
            ExtentMode::Diff,
        ),
        OldContents::Reference(image) => {
            check_size(chip, image)?;
            (Cow::Borrowed(image), ExtentMode::Diff)
        }
        OldContents::NoDiff => {
            info!("No diff performed, considering the chip erased.");
            (
                Cow::Owned(vec![chip.erased_value; chip.total_size as usize]),
                ExtentMode::WholeChip,
            )
        }
    };

    program(device, chip, &old, new, mode, options, progress)
}

/// Erase the chip
///
/// Planned like a write of an all-erased image, so with diffing only the
/// blocks that hold data are erased.
pub fn erase_image<D, P>(
    device: &mut D,
    chip: &FlashChip,
    options: &WriteOptions<'_>,
    progress: &mut P,
) -> core::result::Result<WriteStats, OperationError>
where
    D: FlashDevice + ?Sized,
    P: WriteProgress + ?Sized,
{
    let size = chip.total_size as usize;
    let new = vec![chip.erased_value; size];

    let (old, mode) = match options.old {
        OldContents::ReadChip => (
            Cow::Owned(read_image(device, chip, progress).map_err(OperationError::Read)?),
            ExtentMode::Diff,
        ),
        OldContents::Reference(image) => {
            check_size(chip, image)?;
            (Cow::Borrowed(image), ExtentMode::Diff)
        }
        OldContents::NoDiff => (Cow::Owned(vec![!chip.erased_value; size]), ExtentMode::WholeChip),
    };

    info!("Erasing flash chip...");
    program(device, chip, &old, &new, mode, options, progress)
}

fn program<D, P>(
    device: &mut D,
    chip: &FlashChip,
    old: &[u8],
    new: &[u8],
    mode: ExtentMode,
    options: &WriteOptions<'_>,
    progress: &mut P,
) -> core::result::Result<WriteStats, OperationError>
where
    D: FlashDevice + ?Sized,
    P: WriteProgress + ?Sized,
{
    let mut stats = WriteStats {
        bytes_changed: old.iter().zip(new).filter(|(o, n)| o != n).count(),
        ..Default::default()
    };

    let descriptor = if options.probe_erasers {
        plan::plan(chip, old, new, mode, &mut DryRunFilter::new(&mut *device))
    } else {
        plan::plan(chip, old, new, mode, &mut AllowAll)
    }
    .map_err(OperationError::Plan)?;

    stats.units = descriptor.units().len();
    if descriptor.is_empty() {
        info!("Chip content is identical to the requested image.");
        progress.complete(&stats);
        return Ok(stats);
    }

    let mut current = old.to_vec();
    let exec = match executor::erase_and_write(
        device,
        chip,
        &descriptor,
        &mut current,
        &options.policy,
        progress,
    ) {
        Ok(exec) => exec,
        Err(error) => {
            let assessment = if mode == ExtentMode::WholeChip {
                error!("Erase/write failed and the old contents were never read.");
                FailureAssessment::Unknown
            } else {
                assess_failure(device, chip, old)
            };
            return Err(OperationError::Execute { error, assessment });
        }
    };
    stats.record(&exec);

    if options.verify != VerifyMode::Off {
        if exec.content_changed {
            progress.verifying(match options.verify {
                VerifyMode::Partial => descriptor.total_bytes() as usize,
                _ => new.len(),
            });
            executor::verify(device, chip, &descriptor, options.verify, &options.policy)
                .map_err(OperationError::Verify)?;
            stats.verified = true;
            info!("VERIFIED.");
        } else {
            info!("Nothing was erased or written, skipping verification.");
        }
    }

    progress.complete(&stats);
    Ok(stats)
}

/// Compare the whole chip against `expected`
pub fn verify_image<D, P>(
    device: &mut D,
    chip: &FlashChip,
    expected: &[u8],
    policy: &ExecPolicy,
    progress: &mut P,
) -> core::result::Result<(), OperationError>
where
    D: FlashDevice + ?Sized,
    P: WriteProgress + ?Sized,
{
    check_size(chip, expected)?;

    info!("Verifying flash...");
    progress.verifying(expected.len());
    executor::verify_range(device, chip, expected, 0, policy).map_err(|cause| {
        OperationError::Verify(ExecError::new(OpKind::Verify, 0, chip.total_size, cause))
    })?;
    info!("VERIFIED.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::WriteGranularity;
    use crate::flash::ErrorAction;
    use crate::testing::{small_chip, MockFlash, KIB};

    #[derive(Default)]
    struct Recorder {
        read_total: usize,
        last_read: usize,
        executed: Option<(usize, usize)>,
        last_block: usize,
        verified: usize,
        completed: Option<WriteStats>,
    }

    impl WriteProgress for Recorder {
        fn reading(&mut self, total_bytes: usize) {
            self.read_total = total_bytes;
        }
        fn read_progress(&mut self, bytes_read: usize) {
            self.last_read = bytes_read;
        }
        fn executing(&mut self, units: usize, total_bytes: usize) {
            self.executed = Some((units, total_bytes));
        }
        fn block_done(&mut self, bytes_done: usize) {
            self.last_block = bytes_done;
        }
        fn verifying(&mut self, total_bytes: usize) {
            self.verified = total_bytes;
        }
        fn complete(&mut self, stats: &WriteStats) {
            self.completed = Some(stats.clone());
        }
    }

    #[test]
    fn test_write_image_reads_and_verifies() {
        let chip = small_chip(WriteGranularity::Bytes256);
        let old = vec![0xFF; chip.total_size as usize];
        let mut new = old.clone();
        new[0x100..0x180].fill(0x33);

        let mut mock = MockFlash::new(chip.clone(), &old);
        let mut progress = Recorder::default();
        let stats = write_image(&mut mock, &chip, &new, &WriteOptions::default(), &mut progress)
            .unwrap();

        assert_eq!(mock.memory, new);
        assert_eq!(stats.units, 1);
        assert_eq!(stats.bytes_changed, 0x80);
        assert_eq!(stats.writes_performed, 1);
        assert_eq!(stats.bytes_written, 256);
        assert!(stats.flash_modified);
        assert!(stats.verified);

        assert_eq!(progress.read_total, chip.total_size as usize);
        assert_eq!(progress.last_read, chip.total_size as usize);
        assert_eq!(progress.executed, Some((1, 4 * KIB as usize)));
        assert_eq!(progress.last_block, 4 * KIB as usize);
        assert_eq!(progress.verified, chip.total_size as usize);
        assert_eq!(progress.completed, Some(stats));
    }

    #[test]
    fn test_write_identical_skips_everything() {
        let chip = small_chip(WriteGranularity::Byte);
        let image = vec![0x5A; chip.total_size as usize];

        let mut mock = MockFlash::new(chip.clone(), &image);
        let stats = write_image(&mut mock, &chip, &image, &WriteOptions::default(), &mut NoProgress)
            .unwrap();

        assert_eq!(stats.units, 0);
        assert!(!stats.flash_modified);
        assert!(!stats.verified);
        assert!(mock.erases.is_empty());
        assert!(mock.writes.is_empty());
    }

    #[test]
    fn test_write_with_reference_image() {
        let chip = small_chip(WriteGranularity::Byte);
        let contents = vec![0xFF; chip.total_size as usize];
        let mut new = contents.clone();
        new[0x4000] = 0x01;

        let mut mock = MockFlash::new(chip.clone(), &contents);
        let options = WriteOptions {
            old: OldContents::Reference(&contents),
            verify: VerifyMode::Partial,
            ..Default::default()
        };
        let stats = write_image(&mut mock, &chip, &new, &options, &mut NoProgress).unwrap();

        assert!(stats.verified);
        assert_eq!(mock.memory, new);
        // Only the verification read the chip
        assert_eq!(mock.reads, [(0x4000, 4 * KIB as usize)]);
    }

    #[test]
    fn test_write_no_diff_processes_whole_chip() {
        let chip = small_chip(WriteGranularity::Byte);
        let erased = vec![0xFF; chip.total_size as usize];
        let mut new = erased.clone();
        new[0] = 0x00;

        let mut mock = MockFlash::new(chip.clone(), &erased);
        let options = WriteOptions {
            old: OldContents::NoDiff,
            verify: VerifyMode::Off,
            ..Default::default()
        };
        let stats = write_image(&mut mock, &chip, &new, &options, &mut NoProgress).unwrap();

        assert!(mock.reads.is_empty());
        assert_eq!(stats.writes_performed, 1);
        assert_eq!(mock.memory, new);
    }

    #[test]
    fn test_erase_image_with_diff() {
        let chip = small_chip(WriteGranularity::Bytes256);
        let mut contents = vec![0xFF; chip.total_size as usize];
        contents[0x2000..0x2100].fill(0x00);

        let mut mock = MockFlash::new(chip.clone(), &contents);
        let stats = erase_image(&mut mock, &chip, &WriteOptions::default(), &mut NoProgress).unwrap();

        assert_eq!(mock.erases, [(0, 0x2000, 4 * KIB)]);
        assert_eq!(stats.erases_performed, 1);
        assert!(mock.memory.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_erase_image_no_diff_uses_largest_eraser() {
        let chip = small_chip(WriteGranularity::Bytes256);
        let contents = vec![0xFF; chip.total_size as usize];

        let mut mock = MockFlash::new(chip.clone(), &contents);
        let options = WriteOptions {
            old: OldContents::NoDiff,
            ..Default::default()
        };
        let stats = erase_image(&mut mock, &chip, &options, &mut NoProgress).unwrap();

        assert_eq!(mock.erases, [(2, 0, 64 * KIB)]);
        assert!(stats.verified);
    }

    #[test]
    fn test_probe_erasers_respects_device() {
        let chip = small_chip(WriteGranularity::Byte);
        let contents = vec![0x00; chip.total_size as usize];

        let mut mock = MockFlash::new(chip.clone(), &contents);
        mock.refused_function = Some(2);
        let options = WriteOptions {
            old: OldContents::NoDiff,
            probe_erasers: true,
            ..Default::default()
        };
        erase_image(&mut mock, &chip, &options, &mut NoProgress).unwrap();

        assert_eq!(mock.erases, [(1, 0, 32 * KIB), (1, 32 * KIB, 32 * KIB)]);
    }

    #[test]
    fn test_failure_nothing_changed() {
        let chip = small_chip(WriteGranularity::Byte);
        let old = vec![0x00; chip.total_size as usize];
        let mut new = old.clone();
        new[0x10] = 0x01;

        let mut mock = MockFlash::new(chip.clone(), &old);
        mock.protected = Some(0..0x1000);
        let options = WriteOptions {
            policy: ExecPolicy {
                access_denied: ErrorAction::Abort,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = write_image(&mut mock, &chip, &new, &options, &mut NoProgress).unwrap_err();

        match err {
            OperationError::Execute { error, assessment } => {
                assert_eq!(error.op, OpKind::Erase);
                assert_eq!(assessment, FailureAssessment::NothingChanged);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!err.is_dangerous());
    }

    #[test]
    fn test_failure_partially_written() {
        let chip = small_chip(WriteGranularity::Byte);
        let old = vec![0xFF; chip.total_size as usize];
        let mut new = old.clone();
        new[0x10] = 0x00;
        new[0x8000] = 0x00;

        let mut mock = MockFlash::new(chip.clone(), &old);
        mock.fail_write_at = Some(0x8000);
        let err = write_image(&mut mock, &chip, &new, &WriteOptions::default(), &mut NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            OperationError::Execute {
                assessment: FailureAssessment::PartiallyWritten,
                ..
            }
        ));
        assert!(err.is_dangerous());
    }

    #[test]
    fn test_verify_failure_reported() {
        let chip = small_chip(WriteGranularity::Byte);
        let old = vec![0x00; chip.total_size as usize];
        let mut new = old.clone();
        new[0x1000] = 0x77;

        let mut mock = MockFlash::new(chip.clone(), &old);
        mock.stuck_zero = Some(0x1FFF);
        new[0x1FFF] = 0xFF;
        let err = write_image(&mut mock, &chip, &new, &WriteOptions::default(), &mut NoProgress)
            .unwrap_err();

        match err {
            OperationError::Verify(e) => {
                assert_eq!(
                    e.cause,
                    Error::VerifyError(crate::error::Mismatch {
                        addr: 0x1FFF,
                        expected: 0xFF,
                        found: 0x00,
                        failcount: 1
                    })
                );
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_size_mismatch() {
        let chip = small_chip(WriteGranularity::Byte);
        let mut mock = MockFlash::new(chip.clone(), &vec![0xFF; chip.total_size as usize]);
        let err = write_image(&mut mock, &chip, &[0u8; 16], &WriteOptions::default(), &mut NoProgress)
            .unwrap_err();
        assert_eq!(
            err,
            OperationError::Plan(Error::SizeMismatch {
                expected: chip.total_size,
                actual: 16
            })
        );
        assert!(verify_image(&mut mock, &chip, &[0u8; 16], &ExecPolicy::default(), &mut NoProgress).is_err());
    }

    #[test]
    fn test_verify_image() {
        let chip = small_chip(WriteGranularity::Byte);
        let image = vec![0xA5; chip.total_size as usize];
        let mut mock = MockFlash::new(chip.clone(), &image);

        verify_image(&mut mock, &chip, &image, &ExecPolicy::default(), &mut NoProgress).unwrap();

        mock.memory[0x100] = 0;
        assert!(matches!(
            verify_image(&mut mock, &chip, &image, &ExecPolicy::default(), &mut NoProgress),
            Err(OperationError::Verify(_))
        ));
    }
}
