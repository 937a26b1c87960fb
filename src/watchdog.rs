/// Software watchdog shared between the scan thread and a ticker thread.
///
/// The ticker calls [`Watchdog::tick`] every [`TICK_MS`](crate::board::TICK_MS);
/// activity anywhere calls [`Watchdog::reset`]. Once the count reaches the
/// limit the ticker restarts the device.
use core::sync::atomic::{AtomicU32, Ordering};

pub const WATCHDOG_TIMEOUT_MS: u32 = 30_000;

/// Ticks allowed without a reset
pub const WATCHDOG_TIMEOUT_TICKS: u32 = WATCHDOG_TIMEOUT_MS / crate::board::TICK_MS;

pub struct Watchdog {
    ticks: AtomicU32,
    limit: u32,
}

impl Watchdog {
    pub const fn new() -> Self {
        Self::with_limit(WATCHDOG_TIMEOUT_TICKS)
    }

    pub const fn with_limit(limit: u32) -> Self {
        Self {
            ticks: AtomicU32::new(0),
            limit,
        }
    }

    /// Count one tick. Returns false once the limit has been reached.
    pub fn tick(&self) -> bool {
        self.ticks.fetch_add(1, Ordering::Relaxed) < self.limit
    }

    pub fn reset(&self) {
        self.ticks.store(0, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}
