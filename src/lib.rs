//! VideoCore mailbox driver for BCM2835/BCM2836 firmware bring-up.
//!
//! The crate is layered the way a kernel tree is:
//!
//! - [`mmio`]: little-endian register accessors and timeout-bounded polling
//! - [`drivers::clocksource`]: the free-running counter used for deadlines
//! - [`dt`]: device-tree lookups that locate the mailbox register block
//! - [`drivers::mailbox`]: the raw channel and the property-buffer protocol
//! - [`mm`] / [`arch`]: DMA-aligned buffers and cache maintenance
//!
//! Everything is synchronous and single-threaded. Callers sharing a mailbox
//! between execution contexts must serialize access themselves.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod dt;
pub mod error;
pub mod logging;
pub mod mm;
pub mod mmio;

pub use config::MailboxConfig;
pub use drivers::mailbox::{Mailbox, MailboxError, PropertyBuffer, PropertyError, PropertyMailbox};
pub use error::ErrorKind;
