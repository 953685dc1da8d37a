//! Property tag catalogue.
//!
//! Each tag carries a value buffer shared by the request and the response.
//! The catalogue records how large the request and response bodies are so
//! [`PropertyBuffer::push`] can reserve the right capacity.
//!
//! # References
//!
//! - Firmware wiki: <https://github.com/raspberrypi/firmware/wiki/Mailbox-property-interface>
//!
//! [`PropertyBuffer::push`]: super::PropertyBuffer::push

use core::fmt;

// VideoCore
pub const GET_FIRMWARE_REVISION: u32 = 0x0000_0001;

// Hardware
pub const GET_BOARD_REV: u32 = 0x0001_0002;
pub const GET_MAC_ADDRESS: u32 = 0x0001_0003;
pub const GET_BOARD_SERIAL: u32 = 0x0001_0004;
pub const GET_ARM_MEMORY: u32 = 0x0001_0005;
pub const GET_VC_MEMORY: u32 = 0x0001_0006;

// Power
pub const GET_POWER_STATE: u32 = 0x0002_0001;
pub const SET_POWER_STATE: u32 = 0x0002_8001;

// Clocks
pub const GET_CLOCK_RATE: u32 = 0x0003_0002;
pub const GET_MAX_CLOCK_RATE: u32 = 0x0003_0004;
pub const GET_MIN_CLOCK_RATE: u32 = 0x0003_0007;
pub const NOTIFY_XHCI_RESET: u32 = 0x0003_0058;
pub const SET_SDHOST_CLOCK: u32 = 0x0003_8042;

// Framebuffer
pub const ALLOCATE_BUFFER: u32 = 0x0004_0001;
pub const RELEASE_BUFFER: u32 = 0x0004_8001;
pub const BLANK_SCREEN: u32 = 0x0004_0002;
pub const GET_PHYSICAL_W_H: u32 = 0x0004_0003;
pub const TEST_PHYSICAL_W_H: u32 = 0x0004_4003;
pub const SET_PHYSICAL_W_H: u32 = 0x0004_8003;
pub const GET_VIRTUAL_W_H: u32 = 0x0004_0004;
pub const TEST_VIRTUAL_W_H: u32 = 0x0004_4004;
pub const SET_VIRTUAL_W_H: u32 = 0x0004_8004;
pub const GET_DEPTH: u32 = 0x0004_0005;
pub const TEST_DEPTH: u32 = 0x0004_4005;
pub const SET_DEPTH: u32 = 0x0004_8005;
pub const GET_PIXEL_ORDER: u32 = 0x0004_0006;
pub const TEST_PIXEL_ORDER: u32 = 0x0004_4006;
pub const SET_PIXEL_ORDER: u32 = 0x0004_8006;
pub const GET_ALPHA_MODE: u32 = 0x0004_0007;
pub const TEST_ALPHA_MODE: u32 = 0x0004_4007;
pub const SET_ALPHA_MODE: u32 = 0x0004_8007;
pub const GET_PITCH: u32 = 0x0004_0008;
pub const GET_VIRTUAL_OFFSET: u32 = 0x0004_0009;
pub const TEST_VIRTUAL_OFFSET: u32 = 0x0004_4009;
pub const SET_VIRTUAL_OFFSET: u32 = 0x0004_8009;
pub const GET_OVERSCAN: u32 = 0x0004_000a;
pub const TEST_OVERSCAN: u32 = 0x0004_400a;
pub const SET_OVERSCAN: u32 = 0x0004_800a;
pub const GET_PALETTE: u32 = 0x0004_000b;
pub const TEST_PALETTE: u32 = 0x0004_400b;
pub const SET_PALETTE: u32 = 0x0004_800b;

/// Power domain ids for [`GET_POWER_STATE`] / [`SET_POWER_STATE`]
pub mod power {
    pub const SDHCI: u32 = 0;
    pub const UART0: u32 = 1;
    pub const UART1: u32 = 2;
    pub const USB_HCD: u32 = 3;
    pub const I2C0: u32 = 4;
    pub const I2C1: u32 = 5;
    pub const I2C2: u32 = 6;
    pub const SPI: u32 = 7;
    pub const CCP2TX: u32 = 8;

    /// Request: power on (clear to power off)
    pub const REQ_ON: u32 = 1 << 0;
    /// Request: wait for the power transition to settle
    pub const REQ_WAIT: u32 = 1 << 1;

    /// Response: device is on
    pub const RESP_ON: u32 = 1 << 0;
    /// Response: device doesn't exist
    pub const RESP_NODEV: u32 = 1 << 1;
}

/// Clock ids for the clock rate tags
pub mod clock {
    pub const EMMC: u32 = 1;
    pub const UART: u32 = 2;
    pub const ARM: u32 = 3;
    pub const CORE: u32 = 4;
    pub const V3D: u32 = 5;
    pub const H264: u32 = 6;
    pub const ISP: u32 = 7;
    pub const SDRAM: u32 = 8;
    pub const PIXEL: u32 = 9;
    pub const PWM: u32 = 10;
    pub const EMMC2: u32 = 12;
}

pub const PIXEL_ORDER_BGR: u32 = 0;
pub const PIXEL_ORDER_RGB: u32 = 1;

pub const ALPHA_MODE_0_OPAQUE: u32 = 0;
pub const ALPHA_MODE_0_TRANSPARENT: u32 = 1;
pub const ALPHA_MODE_IGNORED: u32 = 2;

/// Request and response body sizes of one tag, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagSpec {
    pub id: u32,
    pub name: &'static str,
    pub request_len: u32,
    pub response_len: u32,
}

impl TagSpec {
    const fn new(id: u32, name: &'static str, request_len: u32, response_len: u32) -> Self {
        Self {
            id,
            name,
            request_len,
            response_len,
        }
    }

    /// Value buffer size: large enough for either direction.
    pub const fn capacity(&self) -> u32 {
        if self.request_len > self.response_len {
            self.request_len
        } else {
            self.response_len
        }
    }
}

impl fmt::Display for TagSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:08x})", self.name, self.id)
    }
}

/// Palette request: offset, entry count, 256 entries
const PALETTE_REQ: u32 = 8 + 256 * 4;

/// Every tag this driver knows, ordered by id
pub const TAGS: &[TagSpec] = &[
    TagSpec::new(GET_FIRMWARE_REVISION, "get_firmware_revision", 0, 4),
    TagSpec::new(GET_BOARD_REV, "get_board_rev", 0, 4),
    TagSpec::new(GET_MAC_ADDRESS, "get_mac_address", 0, 8),
    TagSpec::new(GET_BOARD_SERIAL, "get_board_serial", 0, 8),
    TagSpec::new(GET_ARM_MEMORY, "get_arm_memory", 0, 8),
    TagSpec::new(GET_VC_MEMORY, "get_vc_memory", 0, 8),
    TagSpec::new(GET_POWER_STATE, "get_power_state", 4, 8),
    TagSpec::new(SET_POWER_STATE, "set_power_state", 8, 8),
    TagSpec::new(GET_CLOCK_RATE, "get_clock_rate", 4, 8),
    TagSpec::new(GET_MAX_CLOCK_RATE, "get_max_clock_rate", 4, 8),
    TagSpec::new(GET_MIN_CLOCK_RATE, "get_min_clock_rate", 4, 8),
    TagSpec::new(NOTIFY_XHCI_RESET, "notify_xhci_reset", 4, 0),
    TagSpec::new(SET_SDHOST_CLOCK, "set_sdhost_clock", 4, 12),
    TagSpec::new(ALLOCATE_BUFFER, "allocate_buffer", 4, 8),
    TagSpec::new(BLANK_SCREEN, "blank_screen", 4, 4),
    TagSpec::new(GET_PHYSICAL_W_H, "get_physical_w_h", 0, 8),
    TagSpec::new(GET_VIRTUAL_W_H, "get_virtual_w_h", 0, 8),
    TagSpec::new(GET_DEPTH, "get_depth", 0, 4),
    TagSpec::new(GET_PIXEL_ORDER, "get_pixel_order", 0, 4),
    TagSpec::new(GET_ALPHA_MODE, "get_alpha_mode", 0, 4),
    TagSpec::new(GET_PITCH, "get_pitch", 0, 4),
    TagSpec::new(GET_VIRTUAL_OFFSET, "get_virtual_offset", 0, 8),
    TagSpec::new(GET_OVERSCAN, "get_overscan", 0, 16),
    TagSpec::new(GET_PALETTE, "get_palette", 0, 1024 * 4),
    TagSpec::new(TEST_PHYSICAL_W_H, "test_physical_w_h", 8, 8),
    TagSpec::new(TEST_VIRTUAL_W_H, "test_virtual_w_h", 8, 8),
    TagSpec::new(TEST_DEPTH, "test_depth", 4, 4),
    TagSpec::new(TEST_PIXEL_ORDER, "test_pixel_order", 4, 4),
    TagSpec::new(TEST_ALPHA_MODE, "test_alpha_mode", 4, 4),
    TagSpec::new(TEST_VIRTUAL_OFFSET, "test_virtual_offset", 8, 8),
    TagSpec::new(TEST_OVERSCAN, "test_overscan", 16, 16),
    TagSpec::new(TEST_PALETTE, "test_palette", PALETTE_REQ, 4),
    TagSpec::new(RELEASE_BUFFER, "release_buffer", 0, 0),
    TagSpec::new(SET_PHYSICAL_W_H, "set_physical_w_h", 8, 8),
    TagSpec::new(SET_VIRTUAL_W_H, "set_virtual_w_h", 8, 8),
    TagSpec::new(SET_DEPTH, "set_depth", 4, 4),
    TagSpec::new(SET_PIXEL_ORDER, "set_pixel_order", 4, 4),
    TagSpec::new(SET_ALPHA_MODE, "set_alpha_mode", 4, 4),
    TagSpec::new(SET_VIRTUAL_OFFSET, "set_virtual_offset", 8, 8),
    TagSpec::new(SET_OVERSCAN, "set_overscan", 16, 16),
    TagSpec::new(SET_PALETTE, "set_palette", PALETTE_REQ, 4),
];

/// Catalogue entry for `id`.
pub fn lookup(id: u32) -> Option<&'static TagSpec> {
    TAGS.iter().find(|spec| spec.id == id)
}

/// Region reported by [`GET_ARM_MEMORY`] or [`GET_VC_MEMORY`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base: u32,
    pub size: u32,
}

/// Reply to [`GET_POWER_STATE`] / [`SET_POWER_STATE`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerState {
    pub device_id: u32,
    pub state: u32,
}

impl PowerState {
    pub fn is_on(&self) -> bool {
        self.state & power::RESP_ON != 0
    }

    pub fn exists(&self) -> bool {
        self.state & power::RESP_NODEV == 0
    }
}

/// Reply to [`SET_SDHOST_CLOCK`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdhostClock {
    pub rate_hz: u32,
    pub rate_1: u32,
    pub rate_2: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        for (i, a) in TAGS.iter().enumerate() {
            assert!(TAGS[i + 1..].iter().all(|b| b.id != a.id), "duplicate {}", a);
        }
    }

    #[test]
    fn capacity_covers_both_directions() {
        let palette = lookup(SET_PALETTE).unwrap();
        assert_eq!(palette.capacity(), 1032);
        assert_eq!(lookup(SET_SDHOST_CLOCK).unwrap().capacity(), 12);
        assert_eq!(lookup(RELEASE_BUFFER).unwrap().capacity(), 0);
        assert!(lookup(0x1234_5678).is_none());
    }

    #[test]
    fn power_state_flags() {
        let on = PowerState { device_id: power::USB_HCD, state: power::RESP_ON };
        assert!(on.is_on() && on.exists());
        let missing = PowerState { device_id: 42, state: power::RESP_NODEV };
        assert!(!missing.is_on());
        assert!(!missing.exists());
    }
}
