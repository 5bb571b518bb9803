//! Kernel logging
//!
//! Backend for the `log` facade. Each record is formatted into a stack
//! buffer and written to the UART in one piece, so logging works before
//! the heap exists and from the panic path. Once the framebuffer console
//! is up the same line is drawn there too.

use core::fmt::Write;

use log::{Level, Log, Metadata, Record};

use crate::config;
use crate::console::{self, StackWriter};
use crate::fb_console;

/// Longest line a single record produces; longer messages are truncated
const LINE_SIZE: usize = 256;

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= config::LOG_LEVEL
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => " WARN",
            Level::Info => " INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let mut line = StackWriter::<LINE_SIZE>::new();
        let _ = writeln!(line, "{} {}: {}", level, record.target(), record.args());
        console::print(line.as_str());
        if config::LOG_TO_FRAMEBUFFER {
            fb_console::puts(line.as_str());
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install the UART logger. Safe to call more than once; later calls are
/// ignored.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(config::LOG_LEVEL))
        .ok();
}
