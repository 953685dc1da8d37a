//! Data cache maintenance by virtual address.
//!
//! The VideoCore reads and writes property buffers with DMA that does not
//! snoop the ARM caches, so buffers are cleaned to the point of coherency
//! before the firmware sees them and invalidated before the CPU reads the
//! firmware's reply.

/// Cache line range `[start, end)` covering `size` bytes at `addr`.
#[inline]
fn line_range(addr: usize, size: usize, line: usize) -> (usize, usize) {
    let start = addr & !(line - 1);
    let end = (addr + size + line - 1) & !(line - 1);
    (start, end)
}

/// Clean (write back) every line of the range to the point of coherency.
pub fn clean_dcache_range(addr: usize, size: usize, line: usize) {
    let (start, end) = line_range(addr, size, line);

    // SAFETY: `dc cvac` only writes back lines; it never discards data and
    // faults only on unmapped addresses, which the caller's buffer is not
    unsafe {
        let mut va = start;
        while va < end {
            core::arch::asm!(
                "dc cvac, {addr}",
                addr = in(reg) va,
                options(nostack)
            );
            va += line;
        }
        core::arch::asm!("dsb sy", options(nostack));
    }
}

/// Invalidate every line of the range so the next read comes from memory.
///
/// Any dirty data in lines sharing the range is lost; the range must be
/// owned by the caller and cache-line aligned.
pub fn invalidate_dcache_range(addr: usize, size: usize, line: usize) {
    let (start, end) = line_range(addr, size, line);

    // SAFETY: the caller owns the whole line-aligned range
    unsafe {
        core::arch::asm!("dsb sy", options(nostack));
        let mut va = start;
        while va < end {
            core::arch::asm!(
                "dc ivac, {addr}",
                addr = in(reg) va,
                options(nostack)
            );
            va += line;
        }
        core::arch::asm!("dsb sy", options(nostack));
    }
}
