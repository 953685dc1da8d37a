//! BCM283x System Timer.
//!
//! A 64-bit counter that increments at 1 MHz regardless of CPU or core
//! clock speed. It cannot be stopped or reset. The mailbox driver only
//! needs the lower 32 bits (CLO) and handles its wraparound.
//!
//! ## Register Layout
//!
//! | Offset | Register | Purpose |
//! |--------|----------|---------|
//! | +0x00  | CS       | Control/Status (interrupt flags) |
//! | +0x04  | CLO      | Counter Lower 32 bits |
//! | +0x08  | CHI      | Counter Upper 32 bits |
//!
//! ## References
//!
//! - BCM2835 ARM Peripherals: Chapter 12
//! - OSDev Wiki: <https://wiki.osdev.org/BCM_System_Timer>

use super::Clock;
use crate::mmio::{Mmio, RegisterBus};

/// Timer block as mapped by the boot firmware's MMU setup.
pub const FIRMWARE_TIMER_BASE: usize = 0xF200_3000;

/// BCM2835 (Pi 1, Zero) ARM physical address.
pub const BCM2835_TIMER_BASE: usize = 0x2000_3000;

/// BCM2836/BCM2837 (Pi 2, Pi 3) ARM physical address.
pub const BCM2836_TIMER_BASE: usize = 0x3F00_3000;

/// System Timer register offsets from the timer base.
mod offset {
    pub const CLO: usize = 0x04; // Counter Lower 32 bits
    pub const CHI: usize = 0x08; // Counter Higher 32 bits
}

/// System Timer peripheral.
pub struct SystemTimer<B = Mmio> {
    base: usize,
    bus: B,
}

impl SystemTimer<Mmio> {
    /// Timer at the firmware mapping, accessed through real MMIO.
    ///
    /// # Safety
    ///
    /// [`FIRMWARE_TIMER_BASE`] must be mapped as device memory.
    pub const unsafe fn firmware() -> Self {
        // SAFETY: forwarded to the caller
        Self::new(FIRMWARE_TIMER_BASE, unsafe { Mmio::new() })
    }
}

impl<B: RegisterBus> SystemTimer<B> {
    /// Timer block at `base` on `bus`.
    pub const fn new(base: usize, bus: B) -> Self {
        Self { base, bus }
    }

    #[inline]
    fn read_clo(&self) -> u32 {
        self.bus.read32(self.base + offset::CLO)
    }

    #[inline]
    fn read_chi(&self) -> u32 {
        self.bus.read32(self.base + offset::CHI)
    }

    /// Read the full 64-bit counter.
    ///
    /// CLO may roll over between the two halves being read; CHI is read on
    /// both sides of CLO and the read retried until they agree.
    pub fn read_counter(&self) -> u64 {
        loop {
            let hi1 = self.read_chi();
            let lo = self.read_clo();
            let hi2 = self.read_chi();

            if hi1 == hi2 {
                return ((hi1 as u64) << 32) | (lo as u64);
            }
        }
    }

    /// Whole seconds since the counter started.
    pub fn uptime_seconds(&self) -> u64 {
        self.read_counter() / 1_000_000
    }
}

impl<B: RegisterBus> Clock for SystemTimer<B> {
    #[inline]
    fn now_us(&self) -> u32 {
        self.read_clo()
    }
}
