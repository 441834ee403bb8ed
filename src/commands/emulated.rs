//! Write, erase and verify against an emulated chip
//!
//! The chip contents live in a plain image file. It is loaded into a
//! [`DummyFlash`] before the operation and stored back afterwards, also
//! when the operation failed half way.

use super::progress::IndicatifProgress;
use super::read_image_file;
use crate::cli::{DiffArgs, EmulatorArgs, PolicyArgs, VerifyArg};
use crate::error::{CommandError, Result};
use flashdiff_core::chip::FlashChip;
use flashdiff_core::flash::{
    self, ErrorAction, ExecPolicy, FailureAssessment, OldContents, OperationError, WriteOptions,
};
use flashdiff_dummy::{DummyConfig, DummyFlash};
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};

/// A [`DummyFlash`] backed by an image file
pub struct EmulatedChip {
    flash: DummyFlash,
    path: PathBuf,
}

impl EmulatedChip {
    /// Load the backing file, or start with an erased chip if it is missing
    pub fn open(chip: &FlashChip, args: &EmulatorArgs) -> Result<Self> {
        let mut config = DummyConfig::new(chip.clone());
        config.protected = args.protect.clone();
        config.restricted_functions = args.restrict_erasers.clone();

        let flash = if args.flash.exists() {
            let data = read_image_file(&args.flash, chip)?;
            DummyFlash::with_data(config, &data)
        } else {
            info!(
                "{} does not exist, starting with an erased chip",
                args.flash.display()
            );
            DummyFlash::new(config)
        };

        Ok(Self {
            flash,
            path: args.flash.clone(),
        })
    }

    pub fn device(&mut self) -> &mut DummyFlash {
        &mut self.flash
    }

    /// Store the chip contents in the backing file
    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, self.flash.data()).map_err(|e| CommandError::io(&self.path, e))
    }
}

fn write_options<'a>(
    diff: &DiffArgs,
    reference: Option<&'a [u8]>,
    policy: &PolicyArgs,
    verify: VerifyArg,
) -> WriteOptions<'a> {
    let old = match reference {
        Some(image) => OldContents::Reference(image),
        None if diff.no_diff => OldContents::NoDiff,
        None => OldContents::ReadChip,
    };
    WriteOptions {
        old,
        verify: verify.into(),
        policy: policy.policy(),
        probe_erasers: policy.probe_erasers,
    }
}

/// Print recovery advice if the chip may be left in a bad state
fn report<T>(result: std::result::Result<T, OperationError>) -> Result<T> {
    result.map_err(|e| {
        if e.is_dangerous() {
            let assessment = match e {
                OperationError::Execute { assessment, .. } => assessment,
                _ => FailureAssessment::PartiallyWritten,
            };
            error!("{}", assessment.help_message());
        }
        CommandError::Operation(e)
    })
}

/// Write `input` to the emulated chip
pub fn run_write(
    chip: &FlashChip,
    emulator: &EmulatorArgs,
    input: &Path,
    diff: &DiffArgs,
    policy: &PolicyArgs,
    verify: VerifyArg,
) -> Result<()> {
    let new = read_image_file(input, chip)?;
    let reference = diff
        .diff_file
        .as_deref()
        .map(|path| read_image_file(path, chip))
        .transpose()?;
    let options = write_options(diff, reference.as_deref(), policy, verify);

    let mut emulated = EmulatedChip::open(chip, emulator)?;
    let mut progress = IndicatifProgress::new();
    let result = flash::write_image(emulated.device(), chip, &new, &options, &mut progress);
    emulated.save()?;
    report(result)?;
    Ok(())
}

/// Erase the emulated chip
pub fn run_erase(
    chip: &FlashChip,
    emulator: &EmulatorArgs,
    diff: &DiffArgs,
    policy: &PolicyArgs,
    verify: VerifyArg,
) -> Result<()> {
    let reference = diff
        .diff_file
        .as_deref()
        .map(|path| read_image_file(path, chip))
        .transpose()?;
    let options = write_options(diff, reference.as_deref(), policy, verify);

    let mut emulated = EmulatedChip::open(chip, emulator)?;
    let mut progress = IndicatifProgress::new();
    let result = flash::erase_image(emulated.device(), chip, &options, &mut progress);
    emulated.save()?;
    report(result)?;
    Ok(())
}

/// Compare the emulated chip with `input`
pub fn run_verify(
    chip: &FlashChip,
    emulator: &EmulatorArgs,
    input: &Path,
    abort_on_denied: bool,
) -> Result<()> {
    let expected = read_image_file(input, chip)?;
    let policy = ExecPolicy {
        access_denied: if abort_on_denied {
            ErrorAction::Abort
        } else {
            ErrorAction::Ignore
        },
        ..Default::default()
    };

    let mut emulated = EmulatedChip::open(chip, emulator)?;
    let mut progress = IndicatifProgress::new();
    flash::verify_image(emulated.device(), chip, &expected, &policy, &mut progress)?;
    println!("Verified");
    Ok(())
}
