//! Flash operations
//!
//! This module provides the device abstraction, write-window analysis,
//! plan execution and the high-level read/write/erase/verify operations.

mod analyze;
mod device;
mod executor;
mod operations;
pub mod poll;
mod recovery;

pub use analyze::*;
pub use device::FlashDevice;
pub use executor::*;
pub use operations::*;
pub use recovery::*;
