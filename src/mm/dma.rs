//! DMA-visible buffers.

use alloc::alloc::{Layout, alloc_zeroed, dealloc};
use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::arch::cache;
use crate::config::DMA_ALIGN;

/// Cache coherency and address mapping for memory the VideoCore accesses.
pub trait DmaOps {
    /// Make CPU writes in `[addr, addr + size)` visible to the device.
    fn flush_for_device(&self, addr: usize, size: usize);

    /// Discard cached copies of `[addr, addr + size)` so CPU reads observe
    /// device writes.
    fn invalidate_from_device(&self, addr: usize, size: usize);

    /// Address the VideoCore uses for CPU address `addr`, if it has one.
    fn bus_address(&self, addr: usize) -> Option<u32>;
}

impl<D: DmaOps + ?Sized> DmaOps for &D {
    fn flush_for_device(&self, addr: usize, size: usize) {
        (**self).flush_for_device(addr, size)
    }

    fn invalidate_from_device(&self, addr: usize, size: usize) {
        (**self).invalidate_from_device(addr, size)
    }

    fn bus_address(&self, addr: usize) -> Option<u32> {
        (**self).bus_address(addr)
    }
}

/// ARM data-cache maintenance plus a fixed CPU-to-bus alias.
#[derive(Debug, Clone, Copy)]
pub struct ArmDma {
    bus_alias: u32,
    line: usize,
}

impl ArmDma {
    /// Bus address equals the ARM physical address (BCM2835 firmware
    /// configured with the L2 alias disabled).
    pub const fn identity() -> Self {
        Self {
            bus_alias: 0,
            line: DMA_ALIGN,
        }
    }

    /// VideoCore sees DRAM through `alias | phys`.
    ///
    /// BCM2711 uses 0xC000_0000 (uncached alias).
    /// Source: U-Boot arch/arm/mach-bcm283x/phys2bus.c
    pub const fn with_bus_alias(bus_alias: u32) -> Self {
        Self {
            bus_alias,
            line: DMA_ALIGN,
        }
    }
}

impl Default for ArmDma {
    fn default() -> Self {
        Self::identity()
    }
}

impl DmaOps for ArmDma {
    fn flush_for_device(&self, addr: usize, size: usize) {
        cache::clean_dcache_range(addr, size, self.line);
    }

    fn invalidate_from_device(&self, addr: usize, size: usize) {
        cache::invalidate_dcache_range(addr, size, self.line);
    }

    fn bus_address(&self, addr: usize) -> Option<u32> {
        u32::try_from(addr).ok().map(|phys| phys | self.bus_alias)
    }
}

/// Zeroed heap allocation aligned and sized to whole cache lines.
///
/// The buffer never shares a cache line with other data, so invalidating
/// it cannot discard anyone else's writes.
pub struct DmaBuffer {
    ptr: NonNull<u32>,
    layout: Layout,
}

// SAFETY: DmaBuffer uniquely owns its allocation
unsafe impl Send for DmaBuffer {}

impl DmaBuffer {
    /// Allocate at least `size` bytes aligned to `align`.
    ///
    /// Returns `None` if `align` is not a power of two of at least 4, or the
    /// allocation fails.
    pub fn zeroed(size: usize, align: usize) -> Option<Self> {
        if align < 4 || !align.is_power_of_two() {
            return None;
        }
        let size = size.max(1).checked_next_multiple_of(align)?;
        let layout = Layout::from_size_align(size, align).ok()?;

        // SAFETY: layout has non-zero size
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw.cast::<u32>())?;

        Some(Self { ptr, layout })
    }

    /// One cache line aligned buffer of at least `size` bytes.
    pub fn for_device(size: usize) -> Option<Self> {
        Self::zeroed(size, DMA_ALIGN)
    }

    /// CPU address of the first byte.
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Allocated size in bytes (a multiple of the alignment).
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    pub fn align(&self) -> usize {
        self.layout.align()
    }

    pub fn fill_zero(&mut self) {
        self.fill(0);
    }
}

impl Deref for DmaBuffer {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        // SAFETY: ptr is a live, zero-initialised allocation of layout.size() bytes
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size() / 4) }
    }
}

impl DerefMut for DmaBuffer {
    fn deref_mut(&mut self) -> &mut [u32] {
        // SAFETY: as above, and &mut self guarantees exclusive access
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size() / 4) }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in zeroed() with this exact layout
        unsafe { dealloc(self.ptr.as_ptr().cast::<u8>(), self.layout) };
    }
}
