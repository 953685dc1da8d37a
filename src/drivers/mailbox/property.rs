//! Property Mailbox Channel
//!
//! High-level interface for the VideoCore property mailbox (channel 8).
//! This channel uses structured messages with tags to query and change
//! system properties like memory split, clocks, power domains, etc.
//!
//! # Protocol
//!
//! Messages consist of:
//! 1. Header (buffer size + request/response code)
//! 2. One or more tags (each with tag ID + value buffer size + value length
//!    + value buffer)
//! 3. End tag (0x00000000)
//!
//! Every field is a 32-bit little-endian word in memory shared with the
//! VideoCore. The buffer must start on a cache line and is passed as a bus
//! address; the firmware writes its response into the same buffer.
//!
//! Between calls the buffer is kept in host byte order. [`PropertyMailbox::call`]
//! converts it to little-endian for the duration of the transaction only.
//!
//! # References
//!
//! - U-Boot: arch/arm/mach-bcm283x/include/mach/mbox.h
//! - Firmware wiki: <https://github.com/raspberrypi/firmware/wiki/Mailbox-property-interface>

use core::fmt;
use log::{Level, debug, log_enabled, trace, warn};

use super::tags::{self, MemoryRegion, PowerState, SdhostClock};
use super::videocore::{Mailbox, MailboxError};
use crate::config::{DMA_ALIGN, MailboxConfig};
use crate::drivers::clocksource::{Clock, SystemTimer};
use crate::error::ErrorKind;
use crate::mm::{ArmDma, DmaBuffer, DmaOps};
use crate::mmio::{Mmio, RegisterBus};

/// Property channel ID
pub const PROPERTY_CHANNEL: u32 = 8;

/// Request code (sent by ARM)
pub const REQUEST_CODE: u32 = 0x0000_0000;

/// Success response code (set by VideoCore)
pub const RESPONSE_CODE_SUCCESS: u32 = 0x8000_0000;

/// Response bit in tag val_len field
pub const TAG_RESPONSE_BIT: u32 = 0x8000_0000;

/// Byte layout of a property message.
pub mod layout {
    /// One 32-bit little-endian field at a byte offset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Field {
        pub name: &'static str,
        pub offset: usize,
    }

    impl Field {
        /// Index of the field in a word slice.
        pub const fn word(&self) -> usize {
            self.offset / 4
        }
    }

    // Message header, at the start of the buffer
    pub const BUF_SIZE: Field = Field { name: "buf_size", offset: 0 };
    pub const CODE: Field = Field { name: "code", offset: 4 };
    pub const HEADER_LEN: usize = 8;

    // Tag header, relative to the start of the tag
    pub const TAG: Field = Field { name: "tag", offset: 0 };
    pub const VAL_BUF_SIZE: Field = Field { name: "val_buf_size", offset: 4 };
    pub const VAL_LEN: Field = Field { name: "val_len", offset: 8 };
    pub const TAG_HEADER_LEN: usize = 12;

    /// Zero word terminating the tag list
    pub const END_TAG_LEN: usize = 4;

    pub(crate) const HEADER_WORDS: usize = HEADER_LEN / 4;
    pub(crate) const TAG_HEADER_WORDS: usize = TAG_HEADER_LEN / 4;

    /// Smallest valid message: header and end tag
    pub const MIN_MESSAGE_LEN: usize = HEADER_LEN + END_TAG_LEN;

    /// Message carrying one tag with a `capacity` byte value buffer.
    pub const fn message_len(capacity: usize) -> usize {
        HEADER_LEN + TAG_HEADER_LEN + capacity.div_ceil(4) * 4 + END_TAG_LEN
    }
}

use layout::{HEADER_WORDS, TAG_HEADER_WORDS};

/// Property mailbox errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyError {
    /// Underlying mailbox error
    Mailbox(MailboxError),
    /// Buffer does not start on a DMA line
    NotAligned,
    /// Header size is not a word multiple, too small, or exceeds the buffer
    InvalidSize { size: u32, available: usize },
    /// The buffer has no VideoCore bus address
    NoBusAddress,
    /// Firmware answered with a different buffer address
    BufferMismatch { sent: u32, received: u32 },
    /// Response code indicates failure
    ResponseFailed(u32),
    /// Tag response bit not set
    TagNotResponded { index: usize, tag: u32 },
    /// Tag list runs past the declared buffer size
    TagOverrun { index: usize },
    /// Tag answered with less data than expected
    ResponseTooShort { tag: u32, len: u32 },
    /// Could not allocate a message buffer
    OutOfMemory,
    /// Message buffer has no room for another tag
    Full,
    /// Tag id not in the catalogue
    UnknownTag(u32),
}

impl PropertyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PropertyError::Mailbox(e) => e.kind(),
            PropertyError::NotAligned
            | PropertyError::InvalidSize { .. }
            | PropertyError::NoBusAddress
            | PropertyError::OutOfMemory
            | PropertyError::Full
            | PropertyError::UnknownTag(_) => ErrorKind::InvalidArgument,
            PropertyError::BufferMismatch { .. } => ErrorKind::ProtocolMismatch,
            PropertyError::ResponseFailed(_)
            | PropertyError::TagNotResponded { .. }
            | PropertyError::TagOverrun { .. }
            | PropertyError::ResponseTooShort { .. } => ErrorKind::HardwareRejected,
        }
    }
}

impl fmt::Display for PropertyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyError::Mailbox(e) => write!(f, "{}", e),
            PropertyError::NotAligned => write!(f, "buffer not cache line aligned"),
            PropertyError::InvalidSize { size, available } => write!(
                f,
                "invalid message size {} ({} bytes available)",
                size, available
            ),
            PropertyError::NoBusAddress => write!(f, "buffer not reachable by the VideoCore"),
            PropertyError::BufferMismatch { sent, received } => write!(
                f,
                "response buffer 0x{:08x} does not match request 0x{:08x}",
                received, sent
            ),
            PropertyError::ResponseFailed(code) => {
                write!(f, "header response code invalid (0x{:08x})", code)
            }
            PropertyError::TagNotResponded { index, tag } => write!(
                f,
                "tag {} (0x{:08x}) missing val_len response bit",
                index, tag
            ),
            PropertyError::TagOverrun { index } => {
                write!(f, "tag {} runs past the end of the buffer", index)
            }
            PropertyError::ResponseTooShort { tag, len } => {
                write!(f, "tag 0x{:08x} returned only {} bytes", tag, len)
            }
            PropertyError::OutOfMemory => write!(f, "out of memory for message buffer"),
            PropertyError::Full => write!(f, "message buffer full"),
            PropertyError::UnknownTag(tag) => write!(f, "unknown tag 0x{:08x}", tag),
        }
    }
}

impl From<MailboxError> for PropertyError {
    fn from(e: MailboxError) -> Self {
        PropertyError::Mailbox(e)
    }
}

/// Log every word of a property buffer at trace level.
pub fn dump_buffer(label: &str, words: &[u32]) {
    if !log_enabled!(Level::Trace) {
        return;
    }
    trace!("mbox: {} buffer:", label);
    for (i, word) in words.iter().enumerate() {
        trace!("    0x{:04x}: 0x{:08x}", i * 4, word);
    }
}

/// DMA line sizes the driver accepts
fn valid_align(align: usize) -> bool {
    align >= 4 && align.is_power_of_two()
}

/// Position of a tag inside a [`PropertyBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagSlot {
    start: usize,
    end: usize,
}

/// View of one tag: header plus value buffer.
#[derive(Debug, Clone, Copy)]
pub struct TagEnvelope<'a> {
    words: &'a [u32],
}

impl<'a> TagEnvelope<'a> {
    pub fn id(&self) -> u32 {
        self.words[layout::TAG.word()]
    }

    /// Value buffer size in bytes
    pub fn capacity(&self) -> u32 {
        self.words[layout::VAL_BUF_SIZE.word()]
    }

    /// Bytes of valid data in the value buffer
    pub fn value_len(&self) -> u32 {
        self.words[layout::VAL_LEN.word()] & !TAG_RESPONSE_BIT
    }

    pub fn value(&self) -> &'a [u32] {
        &self.words[TAG_HEADER_WORDS..]
    }

    /// Byte `i` of the value buffer as the VideoCore laid it out.
    pub fn value_byte(&self, i: usize) -> Option<u8> {
        let word = self.value().get(i / 4)?;
        Some((word >> (8 * (i % 4))) as u8)
    }

    /// First `N` value words, if the firmware returned that many.
    pub fn words<const N: usize>(&self) -> Result<[u32; N], PropertyError> {
        self.check_len(N * 4)?;
        let mut out = [0u32; N];
        out.copy_from_slice(&self.value()[..N]);
        Ok(out)
    }

    /// First `N` value bytes, if the firmware returned that many.
    pub fn bytes<const N: usize>(&self) -> Result<[u8; N], PropertyError> {
        self.check_len(N)?;
        let mut out = [0u8; N];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.value_byte(i).unwrap_or(0);
        }
        Ok(out)
    }

    fn check_len(&self, len: usize) -> Result<(), PropertyError> {
        if (self.value_len() as usize) < len || self.value().len() * 4 < len {
            return Err(PropertyError::ResponseTooShort {
                tag: self.id(),
                len: self.value_len(),
            });
        }
        Ok(())
    }
}

/// Builder for a property message in DMA-safe memory.
///
/// The buffer always holds a valid message: header, the tags pushed so
/// far, and the end tag.
pub struct PropertyBuffer {
    buf: DmaBuffer,
    /// Word index of the end tag
    end: usize,
    tags: usize,
}

impl PropertyBuffer {
    /// Buffer of at least `capacity` bytes aligned to [`DMA_ALIGN`].
    pub fn with_capacity(capacity: usize) -> Result<Self, PropertyError> {
        Self::with_align(capacity, DMA_ALIGN)
    }

    /// Buffer of at least `capacity` bytes aligned to `align`, a power of
    /// two of at least 4.
    pub fn with_align(capacity: usize, align: usize) -> Result<Self, PropertyError> {
        if !valid_align(align) {
            return Err(PropertyError::NotAligned);
        }
        let buf = DmaBuffer::zeroed(capacity.max(layout::MIN_MESSAGE_LEN), align)
            .ok_or(PropertyError::OutOfMemory)?;
        let mut msg = Self {
            buf,
            end: HEADER_WORDS,
            tags: 0,
        };
        msg.reset();
        Ok(msg)
    }

    /// Drop all tags and return to an empty request.
    pub fn reset(&mut self) {
        self.buf.fill_zero();
        self.end = HEADER_WORDS;
        self.tags = 0;
        self.buf[layout::CODE.word()] = REQUEST_CODE;
        self.update_size();
    }

    fn update_size(&mut self) {
        self.buf[layout::BUF_SIZE.word()] = ((self.end + 1) * 4) as u32;
    }

    /// Append tag `id` with a `capacity` byte value buffer holding `request`.
    ///
    /// The value buffer is grown to fit `request` and rounded up to whole
    /// words.
    pub fn push_tag(&mut self, id: u32, capacity: u32, request: &[u32]) -> Result<TagSlot, PropertyError> {
        let req_len = request.len() * 4;
        let value_words = (capacity as usize).max(req_len).div_ceil(4);
        let start = self.end;
        let end = start + TAG_HEADER_WORDS + value_words;
        if end >= self.buf.len() {
            return Err(PropertyError::Full);
        }

        let words = &mut self.buf[start..=end];
        words[layout::TAG.word()] = id;
        words[layout::VAL_BUF_SIZE.word()] = (value_words * 4) as u32;
        words[layout::VAL_LEN.word()] = req_len as u32;
        let value = &mut words[TAG_HEADER_WORDS..];
        value.fill(0);
        value[..request.len()].copy_from_slice(request);

        self.end = end;
        self.tags += 1;
        self.update_size();
        Ok(TagSlot { start, end })
    }

    /// Append tag `id` sized from the catalogue.
    pub fn push(&mut self, id: u32, request: &[u32]) -> Result<TagSlot, PropertyError> {
        let spec = tags::lookup(id).ok_or(PropertyError::UnknownTag(id))?;
        self.push_tag(id, spec.capacity(), request)
    }

    pub fn tag(&self, slot: TagSlot) -> Option<TagEnvelope<'_>> {
        self.buf
            .get(slot.start..slot.end)
            .map(|words| TagEnvelope { words })
    }

    /// Header request/response code
    pub fn code(&self) -> u32 {
        self.buf[layout::CODE.word()]
    }

    /// Header buffer size in bytes
    pub fn size(&self) -> u32 {
        self.buf[layout::BUF_SIZE.word()]
    }

    pub fn tag_count(&self) -> usize {
        self.tags
    }

    /// The whole allocation, covering every cache line of the message.
    pub fn words(&self) -> &[u32] {
        &self.buf
    }

    pub fn words_mut(&mut self) -> &mut [u32] {
        &mut self.buf
    }
}

/// Property mailbox interface
pub struct PropertyMailbox<B = Mmio, C = SystemTimer, D = ArmDma> {
    mbox: Mailbox<B, C>,
    dma: D,
    align: usize,
}

impl<B: RegisterBus, C: Clock, D: DmaOps> PropertyMailbox<B, C, D> {
    pub fn new(mbox: Mailbox<B, C>, dma: D) -> Self {
        Self {
            mbox,
            dma,
            align: DMA_ALIGN,
        }
    }

    pub fn with_config(mbox: Mailbox<B, C>, dma: D, config: &MailboxConfig) -> Self {
        Self {
            mbox,
            dma,
            align: config.dma_align,
        }
    }

    pub fn mailbox(&self) -> &Mailbox<B, C> {
        &self.mbox
    }

    /// Empty message buffer with room for `capacity` bytes.
    pub fn message(&self, capacity: usize) -> Result<PropertyBuffer, PropertyError> {
        PropertyBuffer::with_align(capacity, self.align)
    }

    /// Send a property buffer on the property channel.
    pub fn call_buffer(&self, msg: &mut PropertyBuffer) -> Result<(), PropertyError> {
        self.call(PROPERTY_CHANNEL, msg.words_mut())
    }

    /// Pass a complete property buffer to the VideoCore and wait until it
    /// has been processed.
    ///
    /// `buffer` must start on a DMA line and cover the header's size rounded
    /// up to whole lines. It holds host-order words on entry and on return,
    /// whether or not the call succeeded. On success every tag's response
    /// bit has been cleared, leaving its plain value length.
    ///
    /// # Errors
    ///
    /// - [`PropertyError::NotAligned`], [`PropertyError::InvalidSize`] or
    ///   [`PropertyError::NoBusAddress`] before any hardware access
    /// - [`PropertyError::Mailbox`] if the raw transaction failed
    /// - [`PropertyError::BufferMismatch`] if the firmware answered with
    ///   another buffer
    /// - [`PropertyError::ResponseFailed`] if the header code is not success
    /// - [`PropertyError::TagNotResponded`] for the first tag without its
    ///   response bit; earlier tags have already been cleared
    pub fn call(&self, channel: u32, buffer: &mut [u32]) -> Result<(), PropertyError> {
        if !valid_align(self.align) {
            warn!("mbox: invalid DMA alignment {}", self.align);
            return Err(PropertyError::NotAligned);
        }

        let addr = buffer.as_ptr() as usize;
        if addr % self.align != 0 {
            warn!("mbox: buffer 0x{:x} not aligned to {}", addr, self.align);
            return Err(PropertyError::NotAligned);
        }

        let available = buffer.len() * 4;
        let size = buffer.first().copied().unwrap_or(0);
        let size_aligned = match (size as usize).checked_next_multiple_of(self.align) {
            Some(aligned)
                if (size as usize) >= layout::MIN_MESSAGE_LEN
                    && size % 4 == 0
                    && aligned <= available =>
            {
                aligned
            }
            _ => {
                warn!("mbox: invalid buffer size {} ({} available)", size, available);
                return Err(PropertyError::InvalidSize { size, available });
            }
        };

        let bus = self.dma.bus_address(addr).ok_or(PropertyError::NoBusAddress)?;
        let words = &mut buffer[..size as usize / 4];

        debug!("mbox: property call on channel {}, {} bytes at bus 0x{:08x}", channel, size, bus);
        dump_buffer("send", words);

        for word in words.iter_mut() {
            *word = word.to_le();
        }
        self.dma.flush_for_device(addr, size_aligned);

        let result = self.mbox.call(channel, bus);

        self.dma.invalidate_from_device(addr, size_aligned);
        for word in words.iter_mut() {
            *word = u32::from_le(*word);
        }

        let received = result?;
        if received != bus {
            warn!("mbox: response buffer mismatch");
            return Err(PropertyError::BufferMismatch { sent: bus, received });
        }

        dump_buffer("receive", words);

        let code = words[layout::CODE.word()];
        if code != RESPONSE_CODE_SUCCESS {
            warn!("mbox: header response code invalid (0x{:08x})", code);
            return Err(PropertyError::ResponseFailed(code));
        }

        let mut pos = HEADER_WORDS;
        let mut index = 0;
        loop {
            let Some(&tag) = words.get(pos) else {
                warn!("mbox: tag list not terminated");
                return Err(PropertyError::TagOverrun { index });
            };
            if tag == 0 {
                break;
            }

            let value_words = match words.get(pos + layout::VAL_BUF_SIZE.word()) {
                Some(&len) => (len as usize).div_ceil(4),
                None => return Err(PropertyError::TagOverrun { index }),
            };
            if pos + TAG_HEADER_WORDS + value_words >= words.len() {
                warn!("mbox: tag {} runs past the end of the buffer", index);
                return Err(PropertyError::TagOverrun { index });
            }

            let val_len = &mut words[pos + layout::VAL_LEN.word()];
            if *val_len & TAG_RESPONSE_BIT == 0 {
                warn!("mbox: tag {} missing val_len response bit", index);
                return Err(PropertyError::TagNotResponded { index, tag });
            }
            *val_len &= !TAG_RESPONSE_BIT;

            pos += TAG_HEADER_WORDS + value_words;
            index += 1;
        }

        Ok(())
    }

    /// Send a single-tag message and decode the answer with `decode`.
    fn query<T>(
        &self,
        id: u32,
        request: &[u32],
        decode: impl FnOnce(&TagEnvelope<'_>) -> Result<T, PropertyError>,
    ) -> Result<T, PropertyError> {
        let spec = tags::lookup(id).ok_or(PropertyError::UnknownTag(id))?;
        let mut msg = self.message(layout::message_len(spec.capacity() as usize))?;
        let slot = msg.push(id, request)?;
        self.call_buffer(&mut msg)?;

        let tag = msg
            .tag(slot)
            .ok_or(PropertyError::ResponseTooShort { tag: id, len: 0 })?;
        decode(&tag)
    }

    /// Board revision code
    pub fn get_board_revision(&self) -> Result<u32, PropertyError> {
        self.query(tags::GET_BOARD_REV, &[], |t| t.words::<1>().map(|[rev]| rev))
    }

    /// Get MAC address from VideoCore firmware
    ///
    /// The firmware reads the MAC address from OTP memory.
    pub fn get_mac_address(&self) -> Result<[u8; 6], PropertyError> {
        self.query(tags::GET_MAC_ADDRESS, &[], |t| t.bytes::<6>())
    }

    /// Get board serial number from VideoCore firmware
    pub fn get_board_serial(&self) -> Result<u64, PropertyError> {
        self.query(tags::GET_BOARD_SERIAL, &[], |t| {
            t.words::<2>().map(|[lo, hi]| ((hi as u64) << 32) | lo as u64)
        })
    }

    /// Memory reserved for the ARM cores
    pub fn get_arm_memory(&self) -> Result<MemoryRegion, PropertyError> {
        self.query(tags::GET_ARM_MEMORY, &[], |t| {
            t.words::<2>().map(|[base, size]| MemoryRegion { base, size })
        })
    }

    /// Memory reserved for the VideoCore
    pub fn get_vc_memory(&self) -> Result<MemoryRegion, PropertyError> {
        self.query(tags::GET_VC_MEMORY, &[], |t| {
            t.words::<2>().map(|[base, size]| MemoryRegion { base, size })
        })
    }

    /// Get firmware revision from VideoCore
    pub fn get_firmware_revision(&self) -> Result<u32, PropertyError> {
        self.query(tags::GET_FIRMWARE_REVISION, &[], |t| t.words::<1>().map(|[rev]| rev))
    }

    /// Power state of one of the [`tags::power`] devices
    pub fn get_power_state(&self, device_id: u32) -> Result<PowerState, PropertyError> {
        self.query(tags::GET_POWER_STATE, &[device_id], |t| {
            t.words::<2>().map(|[device_id, state]| PowerState { device_id, state })
        })
    }

    /// Switch a power domain on or off, optionally waiting for it to settle.
    pub fn set_power_state(&self, device_id: u32, on: bool, wait: bool) -> Result<PowerState, PropertyError> {
        let mut state = 0;
        if on {
            state |= tags::power::REQ_ON;
        }
        if wait {
            state |= tags::power::REQ_WAIT;
        }
        let reply = self.query(tags::SET_POWER_STATE, &[device_id, state], |t| {
            t.words::<2>().map(|[device_id, state]| PowerState { device_id, state })
        })?;
        debug!("mbox: power domain {} state 0x{:x}", device_id, reply.state);
        Ok(reply)
    }

    fn clock_rate(&self, tag: u32, clock_id: u32) -> Result<u32, PropertyError> {
        self.query(tag, &[clock_id], |t| t.words::<2>().map(|[_, rate]| rate))
    }

    /// Current rate of a [`tags::clock`] in Hz
    pub fn get_clock_rate(&self, clock_id: u32) -> Result<u32, PropertyError> {
        self.clock_rate(tags::GET_CLOCK_RATE, clock_id)
    }

    pub fn get_max_clock_rate(&self, clock_id: u32) -> Result<u32, PropertyError> {
        self.clock_rate(tags::GET_MAX_CLOCK_RATE, clock_id)
    }

    pub fn get_min_clock_rate(&self, clock_id: u32) -> Result<u32, PropertyError> {
        self.clock_rate(tags::GET_MIN_CLOCK_RATE, clock_id)
    }

    /// Ask the firmware to run the SD host controller at `rate_hz`.
    pub fn set_sdhost_clock(&self, rate_hz: u32) -> Result<SdhostClock, PropertyError> {
        self.query(tags::SET_SDHOST_CLOCK, &[rate_hz], |t| {
            t.words::<3>().map(|[rate_hz, rate_1, rate_2]| SdhostClock { rate_hz, rate_1, rate_2 })
        })
    }

    /// Tell the firmware the XHCI controller at PCI `dev_addr` was reset so
    /// it reloads the controller firmware.
    pub fn notify_xhci_reset(&self, dev_addr: u32) -> Result<(), PropertyError> {
        self.query(tags::NOTIFY_XHCI_RESET, &[dev_addr], |_| Ok(()))
    }
}
