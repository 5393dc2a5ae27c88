//! `log`-crate facade for the kernel.
//!
//! The teacher writes straight to the UART through `uprintln!`. We keep that
//! as the sink but route every call site through the standard `log` facade
//! (as `hudson1998x-rust-os` does against UEFI) so callers use
//! `log::debug!`/`log::warn!` instead of hand-rolled `dbg(DBG_FORK, ...)`
//! macros, and the sink can be swapped (UART today, a ring buffer under
//! test) without touching call sites.

use core::sync::atomic::{AtomicBool, Ordering};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Something that can receive a fully formatted log line.
///
/// The real boot path installs a UART-backed writer; tests install an
/// in-memory one so assertions can inspect what was logged.
pub trait LogSink: Sync {
    fn write_line(&self, level: Level, target: &str, args: &core::fmt::Arguments<'_>);
}

pub struct KernelLogger<S: LogSink + 'static> {
    sink: &'static S,
}

impl<S: LogSink + 'static> KernelLogger<S> {
    pub const fn new(sink: &'static S) -> Self {
        KernelLogger { sink }
    }
}

impl<S: LogSink + 'static> Log for KernelLogger<S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.sink
                .write_line(record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install `logger` as the global `log` backend. Idempotent: a second call
/// is a no-op so re-entering `boot::bootstrap` (e.g. in tests) is harmless.
pub fn init(logger: &'static dyn Log, max_level: LevelFilter) {
    if LOGGER_INSTALLED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_ok()
    {
        log::set_logger(logger).expect("logger already set");
        log::set_max_level(max_level);
    }
}

#[cfg(test)]
pub mod test_sink {
    use super::*;
    use alloc::{format, string::String, vec::Vec};
    use crate::sync::spinlock::Spinlock;

    #[derive(Default)]
    pub struct RecordingSink {
        lines: Spinlock<Vec<String>>,
    }

    impl RecordingSink {
        pub const fn new() -> Self {
            RecordingSink {
                lines: Spinlock::new(Vec::new()),
            }
        }

        pub fn lines(&self) -> Vec<String> {
            self.lines.lock().clone()
        }
    }

    impl LogSink for RecordingSink {
        fn write_line(&self, level: Level, target: &str, args: &core::fmt::Arguments<'_>) {
            self.lines
                .lock()
                .push(format!("[{level}][{target}] {args}"));
        }
    }
}
