//! Console output and `log` backend.
//!
//! Firmware registers whatever serial writer it brought up as the console
//! sink; until then output is discarded. Driver code logs through the `log`
//! macros and never writes to the console directly.

use core::fmt::{self, Write};
use lazy_static::lazy_static;
use spin::Mutex;

type Sink = &'static mut (dyn Write + Send);

lazy_static! {
    static ref CONSOLE: Mutex<Option<Sink>> = Mutex::new(None);
}

static LOGGER: Logger = Logger;

/// Route console output to `sink`, returning the previous sink if any.
pub fn set_console(sink: Sink) -> Option<Sink> {
    CONSOLE.lock().replace(sink)
}

/// Detach the console sink.
pub fn take_console() -> Option<Sink> {
    CONSOLE.lock().take()
}

/// Install [`Logger`] as the global `log` backend.
pub fn init(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    if let Some(sink) = CONSOLE.lock().as_mut() {
        // Nowhere to report a failing console
        let _ = sink.write_fmt(args);
    }
}

/// Print to the registered console
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::logging::_print(format_args!($($arg)*)));
}

/// Print to the registered console, with a newline
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// `log` backend that writes `[file:line] LEVEL: message` lines to the console.
pub struct Logger;

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            crate::println!(
                "[{}:{}] {}: {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}
