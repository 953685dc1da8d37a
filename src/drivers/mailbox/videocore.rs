//! VideoCore Mailbox Hardware Interface
//!
//! Low-level driver for the BCM2835/BCM2836 mailbox used to talk to the
//! VideoCore GPU firmware.
//!
//! # Protocol
//!
//! The mailbox passes 32-bit values where:
//! - Lower 4 bits: channel ID (0-15)
//! - Upper 28 bits: data payload (a 16-byte aligned bus address for the
//!   property channel)
//!
//! # Hardware Operation
//!
//! 1. Drain stale responses until STATUS0 reports empty
//! 2. Wait for STATUS1 to report space
//! 3. Write (data | channel) to WRITE
//! 4. Wait for STATUS0 to report a response
//! 5. Read READ and check the channel matches
//!
//! All three waits share one deadline, taken when the call starts.
//!
//! # References
//!
//! - U-Boot: arch/arm/mach-bcm283x/mbox.c
//! - BCM2835 ARM Peripherals (mailbox block at VC bus 0x7e00b880)

use core::fmt;
use log::{info, trace, warn};

use crate::config::MailboxConfig;
use crate::drivers::clocksource::{Clock, SystemTimer, time_after};
use crate::dt::{self, DeviceTree, DtError};
use crate::error::ErrorKind;
use crate::mmio::{Mmio, RegisterBus};

/// How a register may be accessed by the ARM side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// One 32-bit little-endian mailbox register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub name: &'static str,
    /// Byte offset from the mailbox base
    pub offset: usize,
    pub access: Access,
}

/// Mailbox 0 read (VideoCore to ARM)
pub const READ: Register = Register { name: "read", offset: 0x00, access: Access::ReadOnly };
/// Mailbox 0 status
pub const STATUS0: Register = Register { name: "status0", offset: 0x18, access: Access::ReadOnly };
/// Mailbox 0 config
pub const CONFIG0: Register = Register { name: "config0", offset: 0x1C, access: Access::ReadWrite };
/// Mailbox 1 write (ARM to VideoCore)
pub const WRITE: Register = Register { name: "write", offset: 0x20, access: Access::WriteOnly };
/// Mailbox 1 status
pub const STATUS1: Register = Register { name: "status1", offset: 0x38, access: Access::ReadOnly };
/// Mailbox 1 config
pub const CONFIG1: Register = Register { name: "config1", offset: 0x3C, access: Access::ReadWrite };

/// Full register map, in offset order
pub const REGISTERS: [Register; 6] = [READ, STATUS0, CONFIG0, WRITE, STATUS1, CONFIG1];

/// Mailbox status flags
pub const STATUS_READ_EMPTY: u32 = 0x4000_0000;
pub const STATUS_WRITE_FULL: u32 = 0x8000_0000;

/// Channel mask (lower 4 bits)
pub const CHANNEL_MASK: u32 = 0xF;

/// Mailbox error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    /// Channel does not fit in 4 bits
    InvalidChannel(u32),
    /// Data has its lower 4 bits set
    InvalidData(u32),
    /// Timeout while draining stale responses
    DrainTimeout,
    /// Timeout waiting for space to send
    SendTimeout,
    /// Timeout waiting for response
    ReceiveTimeout,
    /// Response arrived on another channel
    ChannelMismatch { expected: u32, received: u32 },
    /// Mailbox node could not be located
    DeviceTree(DtError),
}

impl MailboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MailboxError::InvalidChannel(_) | MailboxError::InvalidData(_) => {
                ErrorKind::InvalidArgument
            }
            MailboxError::DrainTimeout
            | MailboxError::SendTimeout
            | MailboxError::ReceiveTimeout => ErrorKind::Timeout,
            MailboxError::ChannelMismatch { .. } => ErrorKind::ProtocolMismatch,
            MailboxError::DeviceTree(e) => e.kind(),
        }
    }
}

impl fmt::Display for MailboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailboxError::InvalidChannel(ch) => write!(f, "invalid mailbox channel {}", ch),
            MailboxError::InvalidData(data) => write!(f, "illegal mailbox data 0x{:08x}", data),
            MailboxError::DrainTimeout => write!(f, "timeout draining stale responses"),
            MailboxError::SendTimeout => write!(f, "timeout waiting for send space"),
            MailboxError::ReceiveTimeout => write!(f, "timeout waiting for response"),
            MailboxError::ChannelMismatch { expected, received } => write!(
                f,
                "response on channel {}, expected {}",
                received, expected
            ),
            MailboxError::DeviceTree(e) => write!(f, "mailbox not found: {}", e),
        }
    }
}

impl From<DtError> for MailboxError {
    fn from(e: DtError) -> Self {
        MailboxError::DeviceTree(e)
    }
}

/// Low-level mailbox hardware driver
pub struct Mailbox<B = Mmio, C = SystemTimer> {
    base: usize,
    bus: B,
    clock: C,
    timeout_us: u32,
}

impl<B: RegisterBus, C: Clock> Mailbox<B, C> {
    /// Mailbox at `base`, with the default one second timeout.
    pub fn new(base: usize, bus: B, clock: C) -> Self {
        Self::with_config(base, bus, clock, &MailboxConfig::default())
    }

    pub fn with_config(base: usize, bus: B, clock: C, config: &MailboxConfig) -> Self {
        Self {
            base,
            bus,
            clock,
            timeout_us: config.timeout_us(),
        }
    }

    /// Locate the mailbox through the device-tree alias named in `config`.
    ///
    /// The base is the translated `reg` address of the aliased node.
    pub fn from_device_tree<T: DeviceTree>(
        tree: &T,
        bus: B,
        clock: C,
        config: &MailboxConfig,
    ) -> Result<Self, MailboxError> {
        let base = dt::base_address_virtual(tree, config.alias).map_err(|e| {
            warn!("[mailbox] failed to get base address for \"{}\": {}", config.alias, e);
            MailboxError::DeviceTree(e)
        })?;

        info!("[mailbox] registers at 0x{:08x}", base);
        Ok(Self::with_config(base, bus, clock, config))
    }

    /// Register base address
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn timeout_us(&self) -> u32 {
        self.timeout_us
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    #[inline]
    fn read_reg(&self, reg: Register) -> u32 {
        self.bus.read32(self.base + reg.offset)
    }

    #[inline]
    fn write_reg(&self, reg: Register, value: u32) {
        self.bus.write32(self.base + reg.offset, value)
    }

    #[inline]
    fn expired(&self, deadline: u32) -> bool {
        !time_after(deadline, self.clock.now_us())
    }

    /// Pack channel and data into mailbox value
    #[inline]
    pub const fn pack(channel: u32, data: u32) -> u32 {
        (data & !CHANNEL_MASK) | (channel & CHANNEL_MASK)
    }

    /// Extract channel from mailbox value
    #[inline]
    pub const fn unpack_channel(value: u32) -> u32 {
        value & CHANNEL_MASK
    }

    /// Extract data from mailbox value
    #[inline]
    pub const fn unpack_data(value: u32) -> u32 {
        value & !CHANNEL_MASK
    }

    /// Send raw mailbox message and receive response
    ///
    /// # Arguments
    ///
    /// * `channel` - Mailbox channel (0-15)
    /// * `data` - Data to send (lower 4 bits zero)
    ///
    /// # Returns
    ///
    /// The response data (upper 28 bits of received value)
    ///
    /// # Errors
    ///
    /// - [`MailboxError::InvalidChannel`] / [`MailboxError::InvalidData`]
    ///   before any register is touched
    /// - a timeout variant naming the phase that ran past the deadline
    /// - [`MailboxError::ChannelMismatch`] if the response is for another
    ///   channel
    pub fn call(&self, channel: u32, data: u32) -> Result<u32, MailboxError> {
        if channel > CHANNEL_MASK {
            warn!("mbox: invalid channel {}", channel);
            return Err(MailboxError::InvalidChannel(channel));
        }
        if (data & CHANNEL_MASK) != 0 {
            warn!("mbox: illegal mbox data 0x{:08x}", data);
            return Err(MailboxError::InvalidData(data));
        }

        let deadline = self.clock.now_us().wrapping_add(self.timeout_us);

        // Drain any stale responses
        loop {
            if self.read_reg(STATUS0) & STATUS_READ_EMPTY != 0 {
                break;
            }
            if self.expired(deadline) {
                warn!("mbox: timeout draining stale responses");
                return Err(MailboxError::DrainTimeout);
            }
            let stale = self.read_reg(READ);
            trace!("mbox: drained stale 0x{:08x}", stale);
        }

        // Wait for space to send
        loop {
            if self.read_reg(STATUS1) & STATUS_WRITE_FULL == 0 {
                break;
            }
            if self.expired(deadline) {
                warn!("mbox: timeout waiting for send space");
                return Err(MailboxError::SendTimeout);
            }
            self.clock.relax();
        }

        let value = Self::pack(channel, data);
        trace!("mbox: TX raw: 0x{:08x}", value);
        self.write_reg(WRITE, value);

        // Wait for response
        loop {
            if self.read_reg(STATUS0) & STATUS_READ_EMPTY == 0 {
                break;
            }
            if self.expired(deadline) {
                warn!("mbox: timeout waiting for response");
                return Err(MailboxError::ReceiveTimeout);
            }
            self.clock.relax();
        }

        let response = self.read_reg(READ);
        trace!("mbox: RX raw: 0x{:08x}", response);

        let received = Self::unpack_channel(response);
        if received != channel {
            warn!("mbox: response channel mismatch ({} != {})", received, channel);
            return Err(MailboxError::ChannelMismatch {
                expected: channel,
                received,
            });
        }

        Ok(Self::unpack_data(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::mailbox::testing::{BASE, FakeMailbox, StepClock};
    use crate::dt::testing::TestTree;

    type TestMailbox<'a> = Mailbox<&'a FakeMailbox, &'a StepClock>;

    fn mailbox<'a>(hw: &'a FakeMailbox, clock: &'a StepClock) -> TestMailbox<'a> {
        Mailbox::new(BASE, hw, clock)
    }

    #[test]
    fn register_map_offsets() {
        let offsets: Vec<usize> = REGISTERS.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, [0x00, 0x18, 0x1C, 0x20, 0x38, 0x3C]);
        assert_eq!(WRITE.access, Access::WriteOnly);
    }

    #[test]
    fn pack_and_unpack() {
        let value = TestMailbox::pack(8, 0x0010_0000);
        assert_eq!(value, 0x0010_0008);

        for channel in 0..=15 {
            for data in [0, 0x10, 0x0010_0000, 0x7e00_b880, 0xffff_fff0] {
                let value = TestMailbox::pack(channel, data);
                assert_eq!(value, data | channel);
                assert_eq!(TestMailbox::unpack_channel(value), channel);
                assert_eq!(TestMailbox::unpack_data(value), data);
            }
        }
    }

    #[test]
    fn round_trip_echo() {
        let hw = FakeMailbox::new();
        hw.on_write(|word| Some(word));
        let clock = StepClock::new(1);
        let mbox = mailbox(&hw, &clock);

        assert_eq!(mbox.call(8, 0x0010_0000), Ok(0x0010_0000));
        assert_eq!(hw.written(), [0x0010_0008]);
    }

    #[test]
    fn stale_responses_are_drained_first() {
        let hw = FakeMailbox::new();
        hw.queue(0xdead_0001);
        hw.queue(0xdead_0002);
        hw.on_write(|word| Some(word));
        let clock = StepClock::new(1);

        assert_eq!(mailbox(&hw, &clock).call(1, 0x100), Ok(0x100));
        assert_eq!(hw.drained(), 2);
    }

    #[test]
    fn invalid_arguments_touch_no_register() {
        let hw = FakeMailbox::new();
        let clock = StepClock::new(1);
        let mbox = mailbox(&hw, &clock);

        let err = mbox.call(8, 0x0010_0004).unwrap_err();
        assert_eq!(err, MailboxError::InvalidData(0x0010_0004));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = mbox.call(16, 0x100).unwrap_err();
        assert_eq!(err, MailboxError::InvalidChannel(16));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(hw.accesses(), 0);
    }

    #[test]
    fn full_mailbox_times_out_on_send() {
        let hw = FakeMailbox::new();
        hw.set_write_full(true);
        let clock = StepClock::new(100);
        let mbox = Mailbox::with_config(BASE, &hw, &clock, &MailboxConfig::new().with_timeout_ms(1));

        let err = mbox.call(8, 0x100).unwrap_err();
        assert_eq!(err, MailboxError::SendTimeout);
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(hw.written().is_empty());
    }

    #[test]
    fn silent_firmware_times_out_on_receive() {
        let hw = FakeMailbox::new();
        let clock = StepClock::new(100);
        let mbox = Mailbox::with_config(BASE, &hw, &clock, &MailboxConfig::new().with_timeout_ms(1));

        assert_eq!(mbox.call(8, 0x100), Err(MailboxError::ReceiveTimeout));
        assert_eq!(hw.written(), [0x108]);
    }

    #[test]
    fn endless_stale_data_times_out_on_drain() {
        let hw = FakeMailbox::new();
        hw.set_never_empty(true);
        let clock = StepClock::new(100);
        let mbox = Mailbox::with_config(BASE, &hw, &clock, &MailboxConfig::new().with_timeout_ms(1));

        assert_eq!(mbox.call(8, 0x100), Err(MailboxError::DrainTimeout));
        assert!(hw.written().is_empty());
    }

    #[test]
    fn long_timeout_does_not_expire_at_once() {
        let hw = FakeMailbox::new();
        hw.set_full_polls(3);
        hw.on_write(Some);
        let clock = StepClock::new(1);
        let config = MailboxConfig::new().with_timeout_ms(3_000_000);
        let mbox = Mailbox::with_config(BASE, &hw, &clock, &config);

        assert_eq!(mbox.timeout_us(), i32::MAX as u32);
        assert_eq!(mbox.call(8, 0x100), Ok(0x100));
        assert_eq!(hw.written(), [0x108]);
    }

    #[test]
    fn deadline_is_shared_between_phases() {
        // Send space appears late; the receive phase gets only what is left
        let hw = FakeMailbox::new();
        hw.set_full_polls(8);
        let clock = StepClock::new(100);
        let mbox = Mailbox::with_config(BASE, &hw, &clock, &MailboxConfig::new().with_timeout_ms(1));

        assert_eq!(mbox.call(8, 0x100), Err(MailboxError::ReceiveTimeout));
        // 1000 us budget at 100 us per clock read: 8 send checks leave two
        // receive checks before expiry
        assert_eq!(hw.status0_reads(), 1 + 2);
    }

    #[test]
    fn response_on_wrong_channel() {
        let hw = FakeMailbox::new();
        hw.on_write(|word| Some((word & !CHANNEL_MASK) | 9));
        let clock = StepClock::new(1);

        let err = mailbox(&hw, &clock).call(8, 0x100).unwrap_err();
        assert_eq!(err, MailboxError::ChannelMismatch { expected: 8, received: 9 });
        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
    }

    fn pi2_tree(alias: bool) -> TestTree {
        let mut t = TestTree::new();
        let root = t.root_id();
        t.cells(root, "#address-cells", &[1]);
        t.cells(root, "#size-cells", &[1]);
        if alias {
            let aliases = t.add(root, "aliases");
            t.string(aliases, "mailbox", "/soc/mailbox@7e00b880");
        }
        let soc = t.add(root, "soc");
        t.cells(soc, "#address-cells", &[1]);
        t.cells(soc, "#size-cells", &[1]);
        t.cells(soc, "ranges", &[0x7e00_0000, 0x3f00_0000, 0x0100_0000]);
        let mbox = t.add(soc, "mailbox@7e00b880");
        t.cells(mbox, "reg", &[0x7e00_b880, 0x40]);
        t
    }

    #[test]
    fn located_through_device_tree() {
        let hw = FakeMailbox::new();
        let clock = StepClock::new(1);
        let tree = pi2_tree(true);

        let mbox = Mailbox::from_device_tree(&tree, &hw, &clock, &MailboxConfig::default()).unwrap();
        assert_eq!(mbox.base(), 0x3f00_b880);
        assert_eq!(mbox.timeout_us(), 1_000_000);
    }

    #[test]
    fn missing_alias_is_device_not_found() {
        let hw = FakeMailbox::new();
        let clock = StepClock::new(1);
        let tree = pi2_tree(false);

        let err = Mailbox::from_device_tree(&tree, &hw, &clock, &MailboxConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, MailboxError::DeviceTree(_)));
        assert_eq!(err.kind(), ErrorKind::DeviceNotFound);
    }
}
