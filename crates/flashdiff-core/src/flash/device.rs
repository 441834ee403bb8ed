//! Flash device trait
//!
//! This module provides the `FlashDevice` trait, the programmable hardware
//! surface the executor drives. Implementations translate addresses and
//! erase function indices into whatever their transport needs.

use crate::error::Result;

/// Programmable flash hardware
///
/// All operations use 32-bit addresses, which supports flash sizes up to 4GB.
/// Erase operations name the erase function by its index in
/// [`FlashChip::erase_blocks`](crate::chip::FlashChip::erase_blocks).
///
/// # Example
///
/// ```ignore
/// use flashdiff_core::flash::FlashDevice;
///
/// fn read_first_sector<D: FlashDevice>(device: &mut D) -> Result<Vec<u8>> {
///     let mut buf = vec![0u8; 4096];
///     device.read(0, &mut buf)?;
///     Ok(buf)
/// }
/// ```
pub trait FlashDevice {
    /// Read flash contents into the provided buffer
    ///
    /// # Errors
    /// * `AddressOutOfBounds` - If the read extends beyond flash size
    /// * `AccessDenied` - If the range is not readable
    /// * `ReadError` - If the read operation fails
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Write data to flash
    ///
    /// The target range must already be in a state that allows the write
    /// (erased, or the chip erases implicitly). Completion is awaited before
    /// returning.
    ///
    /// # Errors
    /// * `AddressOutOfBounds` - If the write extends beyond flash size
    /// * `AccessDenied` - If the range is write protected
    /// * `WriteError` - If the write operation fails
    /// * `Timeout` - If the chip never reports completion
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Erase `len` bytes at `addr` with erase function `function`
    ///
    /// `addr` and `len` describe exactly one block of that function.
    ///
    /// # Errors
    /// * `EraserNotSupported` - If the function cannot be executed
    /// * `InvalidAlignment` - If the range is not one block of the function
    /// * `AccessDenied` - If the range is write protected
    /// * `EraseError` - If the erase operation fails
    /// * `Timeout` - If the chip never reports completion
    fn erase(&mut self, function: usize, addr: u32, len: u32) -> Result<()>;

    /// Check whether `erase` would be accepted, without touching the chip
    ///
    /// Used to find out which erase functions the controller allows before
    /// planning. The default accepts everything.
    fn erase_dry_run(&mut self, function: usize, addr: u32, len: u32) -> Result<()> {
        let _ = (function, addr, len);
        Ok(())
    }

    /// Check whether the range may be modified
    ///
    /// Verification skips ranges this rejects with `AccessDenied` when the
    /// policy ignores such errors. The default allows everything.
    fn check_access(&mut self, addr: u32, len: u32) -> Result<()> {
        let _ = (addr, len);
        Ok(())
    }
}

impl<D: FlashDevice + ?Sized> FlashDevice for &mut D {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        (**self).write(addr, data)
    }

    fn erase(&mut self, function: usize, addr: u32, len: u32) -> Result<()> {
        (**self).erase(function, addr, len)
    }

    fn erase_dry_run(&mut self, function: usize, addr: u32, len: u32) -> Result<()> {
        (**self).erase_dry_run(function, addr, len)
    }

    fn check_access(&mut self, addr: u32, len: u32) -> Result<()> {
        (**self).check_access(addr, len)
    }
}
