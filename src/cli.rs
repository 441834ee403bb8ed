//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use flashdiff_core::flash::{ErrorAction, ExecPolicy, VerifyMode};
use std::ops::Range;
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse `START-END` (end exclusive) or `START+LEN`
pub fn parse_range(s: &str) -> Result<Range<u32>, String> {
    let range = if let Some((start, end)) = s.split_once('-') {
        parse_hex_u32(start)?..parse_hex_u32(end)?
    } else if let Some((start, len)) = s.split_once('+') {
        let start = parse_hex_u32(start)?;
        let end = start
            .checked_add(parse_hex_u32(len)?)
            .ok_or_else(|| format!("Range overflows: {}", s))?;
        start..end
    } else {
        return Err(format!("Expected START-END or START+LEN, got '{}'", s));
    };
    if range.is_empty() {
        return Err(format!("Empty range: {}", s));
    }
    Ok(range)
}

#[derive(Parser)]
#[command(name = "flashdiff")]
#[command(author, version, about = "Diff-driven flash programming", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to chip database directory (contains .ron files)
    /// Defaults to looking in ./chips/vendors/ and /usr/share/flashdiff/chips/
    #[arg(long, global = true)]
    pub chip_db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// The emulated chip an operation runs against
#[derive(clap::Args, Debug, Clone)]
pub struct EmulatorArgs {
    /// Chip name from the database
    #[arg(short, long)]
    pub chip: String,

    /// File backing the emulated chip (created erased if missing)
    #[arg(long)]
    pub flash: PathBuf,

    /// Write-protected range, START-END or START+LEN (repeatable)
    #[arg(long, value_parser = parse_range)]
    pub protect: Vec<Range<u32>>,

    /// Erase functions the emulated controller refuses (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub restrict_erasers: Vec<usize>,
}

/// Execution policy options
#[derive(clap::Args, Debug, Clone, Copy, Default)]
pub struct PolicyArgs {
    /// Read back and check after every erase and write
    #[arg(long)]
    pub paranoid: bool,

    /// Fail instead of skipping blocks the controller refuses to touch
    #[arg(long)]
    pub abort_on_denied: bool,

    /// Ask the controller which erase functions it accepts before planning
    #[arg(long)]
    pub probe_erasers: bool,
}

impl PolicyArgs {
    pub fn policy(&self) -> ExecPolicy {
        ExecPolicy {
            paranoid: self.paranoid,
            access_denied: if self.abort_on_denied {
                ErrorAction::Abort
            } else {
                ErrorAction::Ignore
            },
        }
    }
}

/// Where the old contents come from
#[derive(clap::Args, Debug, Clone, Default)]
pub struct DiffArgs {
    /// Don't read the chip, process all of it
    #[arg(long, conflicts_with = "diff_file")]
    pub no_diff: bool,

    /// Trust this file as the current chip contents instead of reading it
    #[arg(long)]
    pub diff_file: Option<PathBuf>,
}

/// Verification after programming
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VerifyArg {
    /// Don't verify
    Off,
    /// Only the ranges that were processed
    Partial,
    /// The whole chip
    #[default]
    Full,
}

impl From<VerifyArg> for VerifyMode {
    fn from(arg: VerifyArg) -> Self {
        match arg {
            VerifyArg::Off => VerifyMode::Off,
            VerifyArg::Partial => VerifyMode::Partial,
            VerifyArg::Full => VerifyMode::Full,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List chips in the database
    ListChips {
        /// Filter by vendor name
        #[arg(long)]
        vendor: Option<String>,
    },

    /// Show the erase/write plan for turning one image into another
    Plan {
        /// Chip name from the database
        #[arg(short, long)]
        chip: String,

        /// Current contents
        #[arg(long)]
        old: PathBuf,

        /// Desired contents
        #[arg(long)]
        new: PathBuf,

        /// Plan for the whole chip instead of the changed extent
        #[arg(long)]
        whole_chip: bool,

        /// Erase functions to leave out (comma-separated)
        #[arg(long, value_delimiter = ',')]
        restrict_erasers: Vec<usize>,
    },

    /// Write file to the emulated chip
    Write {
        #[command(flatten)]
        emulator: EmulatorArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        #[command(flatten)]
        diff: DiffArgs,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Verification after writing
        #[arg(long, value_enum, default_value_t)]
        verify: VerifyArg,
    },

    /// Erase the emulated chip
    Erase {
        #[command(flatten)]
        emulator: EmulatorArgs,

        #[command(flatten)]
        diff: DiffArgs,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Verification after erasing
        #[arg(long, value_enum, default_value_t)]
        verify: VerifyArg,
    },

    /// Verify the emulated chip against a file
    Verify {
        #[command(flatten)]
        emulator: EmulatorArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Fail on ranges the controller refuses to read back
        #[arg(long)]
        abort_on_denied: bool,
    },
}
