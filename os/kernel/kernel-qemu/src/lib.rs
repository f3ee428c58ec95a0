//! # QEMU Debug Console Output
//!
//! Byte-level output to QEMU's debug console (`-debugcon`, I/O port `0x402`)
//! plus a [`log`] backend on top of it.
//!
//! ```bash
//! qemu-system-i386 -kernel kernel.elf -debugcon stdio
//! ```
//!
//! With the `enabled` feature off, [`qemu_trace!`] compiles to nothing and no
//! port I/O is emitted. On real hardware the port is normally unused, so the
//! writes are harmless.
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::LevelFilter;
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.install().expect("logger already installed");
//! log::info!("frame allocator ready");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[cfg(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64")))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug console.
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single byte to the debug console.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(dbg_putc);
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best-effort output; there is nobody to report a failure to.
        let _ = QemuSink.write_fmt(args);
    }
}

#[cfg(not(all(feature = "enabled", any(target_arch = "x86", target_arch = "x86_64"))))]
#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub const fn qemu_write(_: fmt::Arguments) {}
}

/// `print!`-style output to the QEMU debug console.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
