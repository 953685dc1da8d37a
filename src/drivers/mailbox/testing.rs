//! Simulated mailbox hardware and VideoCore firmware for unit tests.

use core::cell::{Cell, RefCell};
use std::boxed::Box;
use std::collections::VecDeque;
use std::vec::Vec;

use super::videocore::{CHANNEL_MASK, READ, STATUS0, STATUS1, STATUS_READ_EMPTY, STATUS_WRITE_FULL, WRITE};
use crate::drivers::clocksource::Clock;
use crate::mm::DmaOps;
use crate::mmio::RegisterBus;

pub(crate) const BASE: usize = 0x3f00_b880;

/// Clock that advances by `step` every time it is read.
pub(crate) struct StepClock {
    now: Cell<u32>,
    step: u32,
}

impl StepClock {
    pub(crate) fn new(step: u32) -> Self {
        Self { now: Cell::new(0), step }
    }
}

impl Clock for StepClock {
    fn now_us(&self) -> u32 {
        let t = self.now.get();
        self.now.set(t.wrapping_add(self.step));
        t
    }
}

type Firmware = Box<dyn FnMut(u32) -> Option<u32>>;

/// Register-level model of the two mailboxes.
///
/// Words written to WRITE are handed to the installed firmware closure;
/// whatever it returns is queued for READ.
#[derive(Default)]
pub(crate) struct FakeMailbox {
    inbound: RefCell<VecDeque<u32>>,
    written: RefCell<Vec<u32>>,
    firmware: RefCell<Option<Firmware>>,
    write_full: Cell<bool>,
    full_polls: Cell<u32>,
    never_empty: Cell<bool>,
    accesses: Cell<usize>,
    status0_reads: Cell<usize>,
    drained: Cell<usize>,
    sent: Cell<bool>,
}

impl FakeMailbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_write(&self, firmware: impl FnMut(u32) -> Option<u32> + 'static) {
        *self.firmware.borrow_mut() = Some(Box::new(firmware));
    }

    /// Leave a stale response in the read mailbox.
    pub(crate) fn queue(&self, word: u32) {
        self.inbound.borrow_mut().push_back(word);
    }

    pub(crate) fn set_write_full(&self, full: bool) {
        self.write_full.set(full);
    }

    /// Report the write mailbox full for the next `n` status polls.
    pub(crate) fn set_full_polls(&self, n: u32) {
        self.full_polls.set(n);
    }

    pub(crate) fn set_never_empty(&self, never_empty: bool) {
        self.never_empty.set(never_empty);
    }

    pub(crate) fn written(&self) -> Vec<u32> {
        self.written.borrow().clone()
    }

    pub(crate) fn accesses(&self) -> usize {
        self.accesses.get()
    }

    pub(crate) fn status0_reads(&self) -> usize {
        self.status0_reads.get()
    }

    /// Words read from READ before the request was sent.
    pub(crate) fn drained(&self) -> usize {
        self.drained.get()
    }
}

impl RegisterBus for FakeMailbox {
    fn read32(&self, addr: usize) -> u32 {
        self.accesses.set(self.accesses.get() + 1);
        match addr - BASE {
            off if off == READ.offset => {
                if !self.sent.get() {
                    self.drained.set(self.drained.get() + 1);
                }
                self.inbound.borrow_mut().pop_front().unwrap_or(0)
            }
            off if off == STATUS0.offset => {
                self.status0_reads.set(self.status0_reads.get() + 1);
                if self.never_empty.get() || !self.inbound.borrow().is_empty() {
                    0
                } else {
                    STATUS_READ_EMPTY
                }
            }
            off if off == STATUS1.offset => {
                let polls = self.full_polls.get();
                if polls > 0 {
                    self.full_polls.set(polls - 1);
                    STATUS_WRITE_FULL
                } else if self.write_full.get() {
                    STATUS_WRITE_FULL
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    fn write32(&self, addr: usize, value: u32) {
        self.accesses.set(self.accesses.get() + 1);
        if addr - BASE != WRITE.offset {
            return;
        }
        self.sent.set(true);
        self.written.borrow_mut().push(value);
        let response = self.firmware.borrow_mut().as_mut().and_then(|fw| fw(value));
        if let Some(word) = response {
            self.inbound.borrow_mut().push_back(word);
        }
    }

    fn read16(&self, _addr: usize) -> u16 {
        0
    }

    fn write16(&self, _addr: usize, _value: u16) {}
}

/// Bus address the fake DMA layer hands out for any buffer
pub(crate) const BUS_ADDR: u32 = 0x0c00_0040;

/// Records cache maintenance and maps every buffer to [`BUS_ADDR`].
#[derive(Default)]
pub(crate) struct FakeDma {
    last_addr: Cell<usize>,
    pub(crate) flushes: RefCell<Vec<(usize, usize)>>,
    pub(crate) invalidates: RefCell<Vec<(usize, usize)>>,
    pub(crate) unmapped: Cell<bool>,
}

impl FakeDma {
    /// CPU address behind a bus address handed out earlier.
    pub(crate) fn cpu_address(&self, bus: u32) -> Option<usize> {
        (bus == BUS_ADDR).then(|| self.last_addr.get())
    }
}

impl DmaOps for FakeDma {
    fn flush_for_device(&self, addr: usize, size: usize) {
        self.flushes.borrow_mut().push((addr, size));
    }

    fn invalidate_from_device(&self, addr: usize, size: usize) {
        self.invalidates.borrow_mut().push((addr, size));
    }

    fn bus_address(&self, addr: usize) -> Option<u32> {
        if self.unmapped.get() {
            return None;
        }
        self.last_addr.set(addr);
        Some(BUS_ADDR)
    }
}

/// Firmware that services property requests with `handle`.
///
/// The buffer is read from memory in little-endian order, handed to
/// `handle` as host-order words, then written back little-endian. The
/// response word echoes the request.
pub(crate) fn property_firmware(
    dma: &'static FakeDma,
    mut handle: impl FnMut(&mut [u32]) + 'static,
) -> impl FnMut(u32) -> Option<u32> + 'static {
    move |word| {
        let addr = dma.cpu_address(word & !CHANNEL_MASK)?;
        // SAFETY: the driver keeps the buffer alive and untouched for the
        // duration of the raw call
        let size = u32::from_le(unsafe { *(addr as *const u32) }) as usize;
        let words = unsafe { core::slice::from_raw_parts_mut(addr as *mut u32, size / 4) };
        for w in words.iter_mut() {
            *w = u32::from_le(*w);
        }
        handle(words);
        for w in words.iter_mut() {
            *w = w.to_le();
        }
        Some(word)
    }
}
