//! Memory shared with the VideoCore
//!
//! Provides cache-line aligned buffers and the cache/bus-address operations
//! that make them visible to the firmware.

pub mod dma;

pub use dma::{ArmDma, DmaBuffer, DmaOps};
