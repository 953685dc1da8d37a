//! Clock sources
//!
//! All timeouts in the driver are measured against a free-running 32-bit
//! microsecond counter. The counter wraps roughly every 71 minutes, so
//! deadlines are compared with [`time_after`], never with `<`/`>`.

pub mod bcm2835;

pub use bcm2835::SystemTimer;

/// A free-running microsecond counter.
pub trait Clock {
    /// Current counter value in microseconds. Wraps at `u32::MAX`.
    fn now_us(&self) -> u32;

    /// Called between polls of a busy-wait loop.
    ///
    /// The default is a spin hint; an environment with a scheduler can
    /// yield here without changing any timeout semantics.
    #[inline]
    fn relax(&self) {
        core::hint::spin_loop();
    }

    /// Busy-wait for at least `us` microseconds, capped at [`MAX_TIMEOUT_US`].
    fn delay_us(&self, us: u32) {
        let end = self.now_us().wrapping_add(us.min(MAX_TIMEOUT_US));
        while !time_after(self.now_us(), end) {
            self.relax();
        }
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_us(&self) -> u32 {
        (**self).now_us()
    }

    fn relax(&self) {
        (**self).relax()
    }

    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Longest interval [`time_after`] can order: 2^31 - 1 microseconds.
pub const MAX_TIMEOUT_US: u32 = i32::MAX as u32;

/// True if counter value `a` is later than `b`, across wraparound.
///
/// Valid while the two values are less than 2^31 microseconds apart.
#[inline]
pub const fn time_after(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) < 0
}
