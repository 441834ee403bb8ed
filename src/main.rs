//! flashdiff - Diff-driven flash programming
//!
//! Compares the current flash contents with the desired image and only
//! erases and writes the blocks that differ, picking the erase granularity
//! per region so densely changed areas use one large erase instead of many
//! small ones.
//!
//! Operations run against an emulated chip whose contents are kept in an
//! image file. Chip geometry comes from the RON chip database.

mod cli;
mod commands;
mod error;

use clap::Parser;
use cli::{Cli, Commands};
use error::CommandError;
use flashdiff_core::chip::ChipDatabase;
use std::path::{Path, PathBuf};

/// Chip definitions built into the binary, used when no database is found
const BUILTIN_CHIPS: &[(&str, &str)] = &[
    ("atmel.ron", include_str!("../chips/vendors/atmel.ron")),
    ("sst.ron", include_str!("../chips/vendors/sst.ron")),
    ("winbond.ron", include_str!("../chips/vendors/winbond.ron")),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG still overrides the level picked by -v
    logger(cli.verbose).parse_default_env().init();

    // Load chip database
    let db = match load_chip_database(cli.chip_db.as_deref()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to load chip database: {}", e);
            std::process::exit(1);
        }
    };

    log::info!("Loaded {} chip definitions", db.len());

    match cli.command {
        Commands::ListChips { vendor } => {
            commands::list_chips(&db, vendor.as_deref());
        }
        Commands::Plan {
            chip,
            old,
            new,
            whole_chip,
            restrict_erasers,
        } => {
            let chip = commands::resolve_chip(&db, &chip)?;
            commands::run_plan(chip, &old, &new, whole_chip, &restrict_erasers)?;
        }
        Commands::Write {
            emulator,
            input,
            diff,
            policy,
            verify,
        } => {
            let chip = commands::resolve_chip(&db, &emulator.chip)?;
            commands::run_write(chip, &emulator, &input, &diff, &policy, verify)?;
        }
        Commands::Erase {
            emulator,
            diff,
            policy,
            verify,
        } => {
            let chip = commands::resolve_chip(&db, &emulator.chip)?;
            commands::run_erase(chip, &emulator, &diff, &policy, verify)?;
        }
        Commands::Verify {
            emulator,
            input,
            abort_on_denied,
        } => {
            let chip = commands::resolve_chip(&db, &emulator.chip)?;
            commands::run_verify(chip, &emulator, &input, abort_on_denied)?;
        }
    }

    Ok(())
}

/// Logger filtered by verbosity: info by default, -v debug, -vv trace
fn logger(verbose: u8) -> env_logger::Builder {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder
}

/// Load the chip database from the specified path or default locations
fn load_chip_database(path: Option<&Path>) -> Result<ChipDatabase, CommandError> {
    let mut db = ChipDatabase::new();

    if let Some(path) = path {
        // User specified a path
        if path.is_dir() {
            db.load_dir(path)?;
        } else if path.is_file() {
            db.load_file(path)?;
        } else {
            return Err(CommandError::ChipDbNotFound(path.to_path_buf()));
        }
        return Ok(db);
    }

    // Try default locations
    let default_paths = [
        PathBuf::from("chips/vendors"),
        PathBuf::from("/usr/share/flashdiff/chips"),
        PathBuf::from("/usr/local/share/flashdiff/chips"),
    ];

    for dir in &default_paths {
        if dir.is_dir() {
            match db.load_dir(dir) {
                Ok(count) => {
                    log::debug!("Loaded {} chips from {}", count, dir.display());
                }
                Err(e) => {
                    log::warn!("Failed to load chips from {}: {}", dir.display(), e);
                }
            }
        }
    }

    if db.is_empty() {
        log::debug!("No chip database found in default locations, using built-in chips");
        for (name, content) in BUILTIN_CHIPS {
            db.load_ron(content)
                .map_err(|e| CommandError::InvalidChip {
                    name: name.to_string(),
                    defect: e.to_string(),
                })?;
        }
    }

    Ok(db)
}
