//! Error classification shared by every layer of the driver.
//!
//! Each layer has its own error enum carrying the details of what went
//! wrong. Upstream code that only needs to decide how to react asks for the
//! [`ErrorKind`].

use core::fmt;

/// Coarse error class reported by every driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller passed a misaligned payload, oversized channel id or bad buffer
    InvalidArgument,
    /// A polling deadline expired
    Timeout,
    /// Response channel or response buffer address did not match the request
    ProtocolMismatch,
    /// Device-tree alias, property or address translation missing
    DeviceNotFound,
    /// Firmware status code or tag response marker rejected the request
    HardwareRejected,
}

impl ErrorKind {
    /// Whether re-issuing the whole transaction may succeed.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorKind::Timeout | ErrorKind::HardwareRejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Timeout => "timed out",
            ErrorKind::ProtocolMismatch => "protocol mismatch",
            ErrorKind::DeviceNotFound => "device not found",
            ErrorKind::HardwareRejected => "rejected by firmware",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
