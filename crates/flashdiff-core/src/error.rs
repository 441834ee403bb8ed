//! Error types for flashdiff-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Details about an erase failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseFailure {
    /// Erase verification failed - block not back at the erased value
    VerifyFailed {
        /// Address where the first non-erased byte was found
        addr: u32,
        /// The byte value found
        found: u8,
    },
}

/// First difference found when reading back flash contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Address of the first differing byte
    pub addr: u32,
    /// Value that should have been there
    pub expected: u8,
    /// Value that was read
    pub found: u8,
    /// Number of differing bytes in the compared range
    pub failcount: u32,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Planning errors
    /// The chip has no usable erase function at all
    NoEraser,
    /// Erase function does not exist, is not implemented, or is refused by
    /// the controller
    EraserNotSupported {
        /// Index into the chip's erase functions
        function: usize,
    },
    /// Image size does not match the chip size
    SizeMismatch {
        /// Chip size in bytes
        expected: u32,
        /// Size of the supplied buffer
        actual: usize,
    },
    /// Chip description is inconsistent
    InvalidChip,

    // Operation errors
    /// Controller refused to touch a protected region
    AccessDenied {
        /// Start of the refused operation
        addr: u32,
    },
    /// Erase operation failed
    EraseError(EraseFailure),
    /// Write/program operation failed
    WriteError {
        /// Start of the failed write
        addr: u32,
    },
    /// Read-back data did not match
    VerifyError(Mismatch),
    /// Completion status never cleared within the polling budget
    Timeout,
    /// Read operation failed
    ReadError,

    // Address/size errors
    /// Address is beyond flash chip size
    AddressOutOfBounds,
    /// Operation requires an aligned address or size
    InvalidAlignment,
}

impl Error {
    /// Check if this is the recoverable "protected region" class of error
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::AccessDenied { .. })
    }
}

impl fmt::Display for EraseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VerifyFailed { addr, found } => {
                write!(
                    f,
                    "erase verify failed at 0x{:08X}: found 0x{:02X}",
                    addr, found
                )
            }
        }
    }
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mismatch at 0x{:08X}: expected 0x{:02X}, found 0x{:02X} ({} bytes differ)",
            self.addr, self.expected, self.found, self.failcount
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEraser => write!(f, "no erase function available for this chip"),
            Self::EraserNotSupported { function } => {
                write!(f, "erase function {} is not supported", function)
            }
            Self::SizeMismatch { expected, actual } => write!(
                f,
                "image size mismatch: chip has {} bytes, image has {}",
                expected, actual
            ),
            Self::InvalidChip => write!(f, "invalid chip description"),
            Self::AccessDenied { addr } => write!(f, "access denied at 0x{:08X}", addr),
            Self::EraseError(failure) => write!(f, "{}", failure),
            Self::WriteError { addr } => write!(f, "write failed at 0x{:08X}", addr),
            Self::VerifyError(mismatch) => write!(f, "verify failed: {}", mismatch),
            Self::Timeout => write!(f, "operation timed out"),
            Self::ReadError => write!(f, "read operation failed"),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::InvalidAlignment => write!(f, "invalid alignment"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
