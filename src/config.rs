//! Driver configuration.

use crate::drivers::clocksource::MAX_TIMEOUT_US;

/// Device-tree alias the firmware uses for the mailbox node
pub const DEFAULT_ALIAS: &str = "mailbox";

/// Timeout for one mailbox transaction (milliseconds)
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

/// Minimum DMA alignment: one cache line on Cortex-A7/A53
pub const DMA_ALIGN: usize = 64;

/// Settings for locating and driving the mailbox.
///
/// Constructed once at boot and handed to [`Mailbox::from_device_tree`].
///
/// [`Mailbox::from_device_tree`]: crate::drivers::mailbox::Mailbox::from_device_tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxConfig {
    /// Name looked up under `/aliases`
    pub alias: &'static str,
    /// Shared deadline for drain, send and receive (milliseconds)
    pub timeout_ms: u32,
    /// Cache line size used to round flush/invalidate regions
    pub dma_align: usize,
}

impl MailboxConfig {
    pub const fn new() -> Self {
        Self {
            alias: DEFAULT_ALIAS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            dma_align: DMA_ALIGN,
        }
    }

    pub const fn with_alias(mut self, alias: &'static str) -> Self {
        self.alias = alias;
        self
    }

    pub const fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Transaction timeout in counter ticks (1 MHz), capped at
    /// [`MAX_TIMEOUT_US`] so the deadline stays comparable.
    pub const fn timeout_us(&self) -> u32 {
        let us = self.timeout_ms.saturating_mul(1000);
        if us > MAX_TIMEOUT_US { MAX_TIMEOUT_US } else { us }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self::new()
    }
}
