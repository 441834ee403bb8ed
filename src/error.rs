//! Command-level errors

use flashdiff_core::chip::ChipDbError;
use flashdiff_core::flash::OperationError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the command implementations
#[derive(Debug, Error)]
pub enum CommandError {
    /// Chip database could not be loaded
    #[error("failed to load chip database: {0}")]
    ChipDb(#[from] ChipDbError),

    /// `--chip-db` points nowhere
    #[error("chip database path not found: {}", .0.display())]
    ChipDbNotFound(PathBuf),

    /// No chip with that name
    #[error("unknown chip '{0}' (see list-chips)")]
    UnknownChip(String),

    /// Chip definition failed its self-check
    #[error("invalid chip definition for {name}: {defect}")]
    InvalidChip { name: String, defect: String },

    /// Reading or writing a file failed
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Image file does not match the chip size
    #[error("{}: file is {actual} bytes, but {chip} is {expected} bytes", path.display())]
    ImageSize {
        path: PathBuf,
        chip: String,
        expected: u32,
        actual: usize,
    },

    /// Planning failed before the chip was touched
    #[error("failed to plan: {0}")]
    Plan(#[from] flashdiff_core::Error),

    /// Read, write, erase or verify failed
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl CommandError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CommandError>;
