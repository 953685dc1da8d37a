//! Device drivers
//!
//! - `clocksource`: free-running counters used for deadlines and delays
//! - `mailbox`: VideoCore mailbox raw channel and property interface

pub mod clocksource;
pub mod mailbox;
