//! AArch64-specific architecture code

pub mod cache;
