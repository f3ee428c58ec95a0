//! # Runtime Configuration

use crate::{memory, sched};
use log::LevelFilter;

/// Knobs the boot path may override. [`Default`] yields the compiled-in layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Page tables identity mapped by the kernel directory (4 MiB each).
    pub identity_mapped_tables: usize,
    /// Virtual base of the heap arena; must lie inside the identity map.
    pub heap_start: u32,
    /// Heap arena length in bytes.
    pub heap_size: u32,
    /// Timer frequency the interrupt layer is programmed with.
    pub timer_hz: u32,
    /// Name of the task created for the boot context.
    pub idle_task_name: &'static str,
    /// Maximum level forwarded to the debug console.
    pub log_level: LevelFilter,
}

impl KernelConfig {
    /// Duration of one tick in milliseconds, never zero.
    #[must_use]
    pub const fn tick_period_ms(&self) -> u32 {
        let hz = if self.timer_hz == 0 { 1 } else { self.timer_hz };
        let ms = 1000 / hz;
        if ms == 0 { 1 } else { ms }
    }

    /// Bytes covered by the identity map.
    #[must_use]
    pub const fn identity_map_size(&self) -> u64 {
        self.identity_mapped_tables as u64 * memory::TABLE_SPAN as u64
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            identity_mapped_tables: memory::IDENTITY_MAPPED_TABLES,
            heap_start: memory::HEAP_START,
            heap_size: memory::HEAP_SIZE,
            timer_hz: sched::TIMER_HZ,
            idle_task_name: "kernel_idle",
            log_level: LevelFilter::Debug,
        }
    }
}
