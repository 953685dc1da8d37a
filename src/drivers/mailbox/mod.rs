//! VideoCore Mailbox Interface
//!
//! The BCM2835/BCM2836 SoC contains the VideoCore GPU which controls initial
//! boot and provides various system services via a mailbox protocol. The
//! mailbox hardware supports passing 32-bit messages between the ARM CPU and
//! VideoCore.
//!
//! The property channel (channel 8) is used for structured requests like
//! querying the memory split, clock rates, power domains, etc.
//!
//! # References
//!
//! - U-Boot: arch/arm/mach-bcm283x/mbox.c
//! - Firmware docs: <https://github.com/raspberrypi/firmware/wiki/Mailboxes>

pub mod property;
pub mod tags;
pub mod videocore;

#[cfg(test)]
pub(crate) mod testing;

pub use property::{PropertyBuffer, PropertyError, PropertyMailbox, TagEnvelope, TagSlot};
pub use videocore::{Mailbox, MailboxError};
