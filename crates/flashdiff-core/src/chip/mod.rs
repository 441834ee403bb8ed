//! Flash chip types and database
//!
//! This module provides types for describing flash chips and their
//! erase/write capabilities, as well as a database of known chips.

mod types;

#[cfg(feature = "std")]
mod database;

pub use types::*;

#[cfg(feature = "std")]
pub use database::*;
