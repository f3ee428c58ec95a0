use crate::qemu_trace;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// [`Log`] implementation writing `"[LEVEL] target: message"` lines to the
/// QEMU debug console.
#[derive(Debug)]
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Register this logger as the global [`log`] backend.
    ///
    /// Call once during early boot, before the first subsystem logs.
    ///
    /// # Errors
    /// Fails if another logger has already been installed.
    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

/// Format one record the way it appears on the console.
pub(crate) fn write_record(out: &mut impl Write, record: &Record) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        struct Console;
        impl Write for Console {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                qemu_trace!("{s}");
                Ok(())
            }
        }

        let _ = write_record(&mut Console, record);
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn record_format() {
        let mut out = String::new();
        write_record(
            &mut out,
            &Record::builder()
                .level(Level::Warn)
                .target("kernel_alloc::free_list")
                .args(format_args!("double free at {:#x}", 0x40_0018))
                .build(),
        )
        .unwrap();
        assert_eq!(out, "[WARN] kernel_alloc::free_list: double free at 0x400018\n");
    }

    #[test]
    fn level_filter() {
        let logger = QemuLogger::new(LevelFilter::Info);
        let debug = Metadata::builder().level(Level::Debug).build();
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
    }
}
