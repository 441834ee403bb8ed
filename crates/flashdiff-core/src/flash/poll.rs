//! Completion polling
//!
//! Flash chips report a busy state while an erase or write is in progress.
//! Devices that need to wait for it implement [`StatusPoll`] and call
//! [`wait_ready`] with one of the [`PollConfig`] presets.

use log::trace;

use crate::error::{Error, Result};

/// Busy-state access for a device
pub trait StatusPoll {
    /// Returns `true` while the last operation is still in progress
    fn is_busy(&mut self) -> Result<bool>;

    /// Delay for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

/// Polling schedule
///
/// The delay between polls starts at `initial_delay_us` and doubles after
/// every busy poll, up to `max_delay_us`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay after the first busy poll
    pub initial_delay_us: u32,
    /// Upper bound for the delay between polls
    pub max_delay_us: u32,
    /// Number of polls before giving up
    pub max_polls: u32,
}

impl PollConfig {
    /// Page program: typically 0.7-3 ms
    pub const PAGE_PROGRAM: Self = Self {
        initial_delay_us: 10,
        max_delay_us: 1_000,
        max_polls: 1_000,
    };

    /// Block erase: 4KB takes tens of ms, a full chip erase can take minutes
    pub const BLOCK_ERASE: Self = Self {
        initial_delay_us: 1_000,
        max_delay_us: 100_000,
        max_polls: 4_000,
    };

    /// Poll at a constant interval
    pub const fn fixed(delay_us: u32, max_polls: u32) -> Self {
        Self {
            initial_delay_us: delay_us,
            max_delay_us: delay_us,
            max_polls,
        }
    }
}

/// Wait until the device is no longer busy
///
/// Returns `Error::Timeout` if the device is still busy after
/// `config.max_polls` polls.
pub fn wait_ready<P: StatusPoll + ?Sized>(dev: &mut P, config: PollConfig) -> Result<()> {
    let mut delay = config.initial_delay_us;

    for poll in 0..config.max_polls {
        if !dev.is_busy()? {
            if poll > 0 {
                trace!("Ready after {} polls", poll + 1);
            }
            return Ok(());
        }
        if delay > 0 {
            dev.delay_us(delay);
        }
        delay = delay.saturating_mul(2).min(config.max_delay_us);
    }

    Err(Error::Timeout)
}
