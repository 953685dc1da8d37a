//! Architecture-specific code
//!
//! Only data-cache maintenance is needed by the driver. Targets without a
//! dedicated implementation are treated as cache-coherent and get a memory
//! fence instead.

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

#[cfg(target_arch = "aarch64")]
pub use aarch64::cache;

#[cfg(not(target_arch = "aarch64"))]
pub mod cache {
    use core::sync::atomic::{Ordering, fence};

    pub fn clean_dcache_range(_start: usize, _size: usize, _line: usize) {
        fence(Ordering::SeqCst);
    }

    pub fn invalidate_dcache_range(_start: usize, _size: usize, _line: usize) {
        fence(Ordering::SeqCst);
    }
}
