//! CLI command implementations
//!
//! Everything except `list-chips` and `plan` runs against a [`DummyFlash`]
//! backed by an image file, so the planner and executor can be exercised
//! end to end without hardware.
//!
//! [`DummyFlash`]: flashdiff_dummy::DummyFlash

mod emulated;
mod list;
mod plan;
mod progress;

use crate::error::{CommandError, Result};
use flashdiff_core::chip::{ChipDatabase, FlashChip};
use std::fs;
use std::path::Path;

pub use emulated::{run_erase, run_verify, run_write, EmulatedChip};
pub use list::list_chips;
pub use plan::run_plan;

/// Look up a chip by name, rejecting inconsistent definitions
pub fn resolve_chip<'a>(db: &'a ChipDatabase, name: &str) -> Result<&'a FlashChip> {
    let chip = db
        .find_exact(name)
        .ok_or_else(|| CommandError::UnknownChip(name.to_string()))?;
    chip.validate().map_err(|defect| CommandError::InvalidChip {
        name: chip.name().to_string(),
        defect: defect.to_string(),
    })?;
    Ok(chip)
}

/// Read an image file that must be exactly the chip size
pub fn read_image_file(path: &Path, chip: &FlashChip) -> Result<Vec<u8>> {
    let data = fs::read(path).map_err(|e| CommandError::io(path, e))?;
    if data.len() != chip.total_size as usize {
        return Err(CommandError::ImageSize {
            path: path.to_path_buf(),
            chip: chip.name().to_string(),
            expected: chip.total_size,
            actual: data.len(),
        });
    }
    log::debug!("Read {} bytes from {}", data.len(), path.display());
    Ok(data)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_chip() {
        let db = testing::db();
        assert_eq!(resolve_chip(&db, "t64k").unwrap().total_size, 64 * 1024);
        assert!(matches!(
            resolve_chip(&db, "T128K"),
            Err(CommandError::UnknownChip(_))
        ));
    }

    #[test]
    fn test_read_image_file_checks_size() {
        let dir = tempfile::tempdir().unwrap();
        let chip = testing::chip();

        let good = dir.path().join("good.bin");
        fs::write(&good, vec![0u8; chip.total_size as usize]).unwrap();
        assert_eq!(read_image_file(&good, &chip).unwrap().len(), 64 * 1024);

        let short = dir.path().join("short.bin");
        fs::write(&short, [0u8; 16]).unwrap();
        assert!(matches!(
            read_image_file(&short, &chip),
            Err(CommandError::ImageSize { actual: 16, .. })
        ));

        assert!(matches!(
            read_image_file(&dir.path().join("missing.bin"), &chip),
            Err(CommandError::Io { .. })
        ));
    }
}
