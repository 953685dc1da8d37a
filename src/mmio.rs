//! Memory-mapped register access.
//!
//! The peripherals are little-endian. Every access converts between host
//! and device byte order, so the same driver code is correct on big-endian
//! and little-endian CPUs. Nothing is cached: each call is one bus access.
//!
//! Register access goes through [`RegisterBus`] so the drivers above it can
//! run against a simulated register file in tests.

use core::fmt;
use volatile::Volatile;

use crate::drivers::clocksource::{Clock, MAX_TIMEOUT_US, time_after};
use crate::error::ErrorKind;

/// 32/16-bit register access at absolute addresses.
pub trait RegisterBus {
    fn read32(&self, addr: usize) -> u32;
    fn write32(&self, addr: usize, value: u32);
    fn read16(&self, addr: usize) -> u16;
    fn write16(&self, addr: usize, value: u16);
}

impl<B: RegisterBus + ?Sized> RegisterBus for &B {
    fn read32(&self, addr: usize) -> u32 {
        (**self).read32(addr)
    }

    fn write32(&self, addr: usize, value: u32) {
        (**self).write32(addr, value)
    }

    fn read16(&self, addr: usize) -> u16 {
        (**self).read16(addr)
    }

    fn write16(&self, addr: usize, value: u16) {
        (**self).write16(addr, value)
    }
}

/// Volatile access to physical (identity-mapped) device memory.
#[derive(Debug, Clone, Copy)]
pub struct Mmio {
    _private: (),
}

impl Mmio {
    /// Create a bus handle for real device memory.
    ///
    /// # Safety
    ///
    /// Every address later passed to this handle must be a mapped, naturally
    /// aligned device register. Reads and writes have hardware side effects.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterBus for Mmio {
    #[inline]
    fn read32(&self, addr: usize) -> u32 {
        // SAFETY: Mmio::new() contract - addr is a valid 32-bit register
        let reg = unsafe { &*(addr as *const Volatile<u32>) };
        u32::from_le(reg.read())
    }

    #[inline]
    fn write32(&self, addr: usize, value: u32) {
        // SAFETY: Mmio::new() contract - addr is a valid 32-bit register
        let reg = unsafe { &mut *(addr as *mut Volatile<u32>) };
        reg.write(value.to_le());
    }

    #[inline]
    fn read16(&self, addr: usize) -> u16 {
        // SAFETY: Mmio::new() contract - addr is a valid 16-bit register
        let reg = unsafe { &*(addr as *const Volatile<u16>) };
        u16::from_le(reg.read())
    }

    #[inline]
    fn write16(&self, addr: usize, value: u16) {
        // SAFETY: Mmio::new() contract - addr is a valid 16-bit register
        let reg = unsafe { &mut *(addr as *mut Volatile<u16>) };
        reg.write(value.to_le());
    }
}

pub fn clear_bits32<B: RegisterBus + ?Sized>(bus: &B, addr: usize, clear: u32) {
    bus.write32(addr, bus.read32(addr) & !clear);
}

pub fn set_bits32<B: RegisterBus + ?Sized>(bus: &B, addr: usize, set: u32) {
    bus.write32(addr, bus.read32(addr) | set);
}

pub fn clear_set_bits32<B: RegisterBus + ?Sized>(bus: &B, addr: usize, clear: u32, set: u32) {
    bus.write32(addr, (bus.read32(addr) & !clear) | set);
}

/// A poll gave up; carries the value of the final read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeout {
    pub last: u32,
}

impl PollTimeout {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Timeout
    }
}

impl fmt::Display for PollTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "poll timed out (last value 0x{:08x})", self.last)
    }
}

/// Call `read` until `cond` holds or `timeout_us` elapses.
///
/// Once the deadline has passed, one more read is made and its value decides
/// the outcome. A `timeout_us` of zero waits forever; longer timeouts are
/// capped at [`MAX_TIMEOUT_US`].
pub fn poll_timeout<C, R, F>(clock: &C, read: R, cond: F, timeout_us: u32) -> Result<u32, PollTimeout>
where
    C: Clock + ?Sized,
    R: FnMut() -> u32,
    F: Fn(u32) -> bool,
{
    poll_timeout_sleep(clock, read, cond, 0, timeout_us)
}

/// [`poll_timeout`] with a `sleep_us` delay between reads.
pub fn poll_timeout_sleep<C, R, F>(
    clock: &C,
    mut read: R,
    cond: F,
    sleep_us: u32,
    timeout_us: u32,
) -> Result<u32, PollTimeout>
where
    C: Clock + ?Sized,
    R: FnMut() -> u32,
    F: Fn(u32) -> bool,
{
    let deadline = clock.now_us().wrapping_add(timeout_us.min(MAX_TIMEOUT_US));

    loop {
        let value = read();
        if cond(value) {
            return Ok(value);
        }

        if timeout_us != 0 && time_after(clock.now_us(), deadline) {
            let value = read();
            return if cond(value) {
                Ok(value)
            } else {
                Err(PollTimeout { last: value })
            };
        }

        if sleep_us != 0 {
            clock.delay_us(sleep_us);
        } else {
            clock.relax();
        }
    }
}

/// Poll the register at `addr` until `cond` holds.
pub fn read_poll_timeout<B, C, F>(
    bus: &B,
    clock: &C,
    addr: usize,
    cond: F,
    timeout_us: u32,
) -> Result<u32, PollTimeout>
where
    B: RegisterBus + ?Sized,
    C: Clock + ?Sized,
    F: Fn(u32) -> bool,
{
    poll_timeout(clock, || bus.read32(addr), cond, timeout_us)
}

// Bit and size arithmetic

/// Round `x` up to a multiple of `align`.
#[inline]
pub const fn round_up(x: usize, align: usize) -> usize {
    x.div_ceil(align) * align
}

/// Round `x` down to a multiple of `align`.
#[inline]
pub const fn round_down(x: usize, align: usize) -> usize {
    x - (x % align)
}

#[inline]
pub const fn upper_32_bits(n: u64) -> u32 {
    (n >> 32) as u32
}

#[inline]
pub const fn lower_32_bits(n: u64) -> u32 {
    n as u32
}

/// Position of the most significant set bit, 1-based; 0 for 0.
#[inline]
pub const fn fls(x: u32) -> u32 {
    32 - x.leading_zeros()
}

#[inline]
pub const fn fls64(x: u64) -> u32 {
    64 - x.leading_zeros()
}

/// Floor of log2; 0 for 0.
#[inline]
pub const fn ilog2(x: u32) -> u32 {
    fls(x).saturating_sub(1)
}

/// Shift `value` into the bit positions selected by the contiguous `field` mask.
#[inline]
pub const fn encode_bits(value: u32, field: u32) -> u32 {
    if field == 0 {
        return 0;
    }
    let shift = field.trailing_zeros();
    (value << shift) & field
}

/// Replace the bits of `word` selected by `field` with `value`.
#[inline]
pub const fn replace_bits(word: u32, value: u32, field: u32) -> u32 {
    (word & !field) | encode_bits(value, field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use std::collections::HashMap;
    use std::cell::RefCell;

    /// Clock that advances by `step` every time it is read.
    struct SteppingClock {
        now: Cell<u32>,
        step: u32,
    }

    impl Clock for SteppingClock {
        fn now_us(&self) -> u32 {
            let t = self.now.get();
            self.now.set(t.wrapping_add(self.step));
            t
        }
    }

    #[derive(Default)]
    struct Registers(RefCell<HashMap<usize, u32>>);

    impl RegisterBus for Registers {
        fn read32(&self, addr: usize) -> u32 {
            *self.0.borrow().get(&addr).unwrap_or(&0)
        }
        fn write32(&self, addr: usize, value: u32) {
            self.0.borrow_mut().insert(addr, value);
        }
        fn read16(&self, addr: usize) -> u16 {
            self.read32(addr) as u16
        }
        fn write16(&self, addr: usize, value: u16) {
            self.write32(addr, value as u32);
        }
    }

    #[test]
    fn poll_returns_immediately_when_condition_holds() {
        let clock = SteppingClock { now: Cell::new(0), step: 1 };
        let reads = Cell::new(0);
        let result = poll_timeout(
            &clock,
            || {
                reads.set(reads.get() + 1);
                7
            },
            |v| v == 7,
            100,
        );
        assert_eq!(result, Ok(7));
        assert_eq!(reads.get(), 1);
        // Only the deadline computation touched the clock
        assert_eq!(clock.now.get(), 1);
    }

    #[test]
    fn poll_times_out_after_deadline_with_one_extra_read() {
        let clock = SteppingClock { now: Cell::new(0), step: 10 };
        let reads = Cell::new(0u32);
        let result = poll_timeout(
            &clock,
            || {
                reads.set(reads.get() + 1);
                reads.get()
            },
            |_| false,
            100,
        );

        // Deadline 100: clock checks return 10, 20, .., 110; 110 is after it.
        // One read per check plus the final read after expiry.
        assert_eq!(result, Err(PollTimeout { last: 12 }));
        assert_eq!(reads.get(), 12);
        assert!(clock.now.get() - 10 > 100);
    }

    #[test]
    fn poll_with_huge_timeout_waits() {
        // u32::MAX would put the deadline just behind the start time
        let clock = SteppingClock { now: Cell::new(0), step: 10 };
        let reads = Cell::new(0u32);
        let result = poll_timeout(
            &clock,
            || {
                reads.set(reads.get() + 1);
                reads.get()
            },
            |v| v == 5,
            u32::MAX,
        );
        assert_eq!(result, Ok(5));
        assert_eq!(reads.get(), 5);
    }

    #[test]
    fn poll_final_read_can_still_succeed() {
        let clock = SteppingClock { now: Cell::new(0), step: 50 };
        let reads = Cell::new(0u32);
        let result = poll_timeout(
            &clock,
            || {
                reads.set(reads.get() + 1);
                reads.get()
            },
            |v| v == 4,
            100,
        );
        assert_eq!(result, Ok(4));
    }

    #[test]
    fn poll_handles_counter_wraparound() {
        let clock = SteppingClock { now: Cell::new(u32::MAX - 15), step: 10 };
        let reads = Cell::new(0u32);
        let result = poll_timeout(
            &clock,
            || {
                reads.set(reads.get() + 1);
                0
            },
            |_| false,
            100,
        );
        assert!(result.is_err());
        // A magnitude comparison would have given up on the first check
        assert_eq!(reads.get(), 12);
    }

    #[test]
    fn read_poll_timeout_reads_register() {
        let regs = Registers::default();
        regs.write32(0x18, 0x4000_0000);
        let clock = SteppingClock { now: Cell::new(0), step: 1 };
        let value = read_poll_timeout(&regs, &clock, 0x18, |v| v & 0x4000_0000 != 0, 10);
        assert_eq!(value, Ok(0x4000_0000));
    }

    #[test]
    fn read_modify_write_helpers() {
        let regs = Registers::default();
        regs.write32(0x10, 0b1010);
        set_bits32(&regs, 0x10, 0b0001);
        assert_eq!(regs.read32(0x10), 0b1011);
        clear_bits32(&regs, 0x10, 0b1000);
        assert_eq!(regs.read32(0x10), 0b0011);
        clear_set_bits32(&regs, 0x10, 0b0011, 0b0100);
        assert_eq!(regs.read32(0x10), 0b0100);
    }

    #[test]
    fn arithmetic_helpers() {
        assert_eq!(round_up(20, 64), 64);
        assert_eq!(round_up(64, 64), 64);
        assert_eq!(round_down(70, 64), 64);
        assert_eq!(upper_32_bits(0x1234_5678_9abc_def0), 0x1234_5678);
        assert_eq!(lower_32_bits(0x1234_5678_9abc_def0), 0x9abc_def0);
        assert_eq!(fls(0), 0);
        assert_eq!(fls(1), 1);
        assert_eq!(fls(0x8000_0000), 32);
        assert_eq!(fls64(1 << 40), 41);
        assert_eq!(ilog2(64), 6);
        assert_eq!(ilog2(100), 6);
        assert_eq!(encode_bits(0x3, 0x0000_0f00), 0x0000_0300);
        assert_eq!(replace_bits(0xffff_ffff, 0x5, 0x0000_00f0), 0xffff_ff5f);
        assert_eq!(encode_bits(1, 0), 0);
    }
}
