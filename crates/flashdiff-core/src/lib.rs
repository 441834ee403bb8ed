//! flashdiff-core - Diff-driven flash reprogramming engine
//!
//! This crate compares the current contents of a flash chip with a desired
//! image and works out the smallest hardware-legal set of erase and write
//! operations that turns one into the other. It is designed to be `no_std`
//! compatible (it only needs `alloc`).
//!
//! The work is split in two halves:
//!
//! - [`plan`] builds an [`plan::ActionDescriptor`]: it picks the usable erase
//!   granularities, marks changed blocks, folds densely changed regions into
//!   larger erases and emits a list of processing units.
//! - [`flash`] executes a plan against a [`flash::FlashDevice`], verifies the
//!   result and assesses the damage when something goes wrong.
//!
//! # Features
//!
//! - `std` - Enable standard library support and the RON chip database
//!
//! # Example
//!
//! ```ignore
//! use flashdiff_core::flash::{self, ExecPolicy, NoProgress, WriteOptions};
//!
//! fn update<D: flash::FlashDevice>(device: &mut D, chip: &FlashChip, image: &[u8]) {
//!     let options = WriteOptions::default();
//!     match flash::write_image(device, chip, image, &options, &mut NoProgress) {
//!         Ok(stats) => println!("{} bytes written", stats.bytes_written),
//!         Err(e) => println!("Write failed: {}", e),
//!     }
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod chip;
pub mod error;
pub mod flash;
pub mod plan;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
