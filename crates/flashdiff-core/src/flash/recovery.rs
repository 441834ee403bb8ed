//! Damage assessment after a failed erase/write

use core::fmt;

use log::{error, warn};

use super::device::FlashDevice;
use super::operations::{read_image, NoProgress};
use crate::chip::FlashChip;

/// State of the chip after a failed erase/write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAssessment {
    /// The chip still holds the old contents
    NothingChanged,
    /// Some of the chip was modified
    PartiallyWritten,
    /// The chip could not be read back
    Unreadable,
    /// The old contents were never read, so the damage can't be judged
    Unknown,
}

impl FailureAssessment {
    /// Check if the chip may hold neither the old nor the new contents
    pub fn is_dangerous(&self) -> bool {
        !matches!(self, Self::NothingChanged)
    }

    /// Advice for the user
    pub fn help_message(&self) -> &'static str {
        match self {
            Self::NothingChanged => {
                "Writing to the flash chip apparently didn't do anything. \
                 Check the connections and any write protection between the \
                 programmer and the chip, then try again."
            }
            Self::PartiallyWritten | Self::Unreadable | Self::Unknown => {
                "The flash chip is in an unknown state. Do not power off or \
                 reboot before it has been reprogrammed successfully, or \
                 restore a backup with an external programmer."
            }
        }
    }
}

impl fmt::Display for FailureAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NothingChanged => write!(f, "chip contents unchanged"),
            Self::PartiallyWritten => write!(f, "chip partially written"),
            Self::Unreadable => write!(f, "chip unreadable"),
            Self::Unknown => write!(f, "chip state unknown"),
        }
    }
}

/// Read the chip back and compare with what it held before the operation
pub fn assess_failure<D: FlashDevice + ?Sized>(
    device: &mut D,
    chip: &FlashChip,
    snapshot: &[u8],
) -> FailureAssessment {
    error!("Erase/write failed. Checking if anything has changed.");

    match read_image(device, chip, &mut NoProgress) {
        Err(e) => {
            error!("Can't even read anymore: {}", e);
            FailureAssessment::Unreadable
        }
        Ok(current) if current == snapshot => {
            warn!("Good. It seems nothing was changed.");
            FailureAssessment::NothingChanged
        }
        Ok(_) => {
            error!("Apparently at least some data has changed.");
            FailureAssessment::PartiallyWritten
        }
    }
}
