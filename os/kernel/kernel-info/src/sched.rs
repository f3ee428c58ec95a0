//! # Scheduling Constants

/// Programmed timer frequency.
pub const TIMER_HZ: u32 = 100;

/// Length of one timer tick.
pub const TICK_PERIOD_MS: u32 = 1000 / TIMER_HZ;

/// Ticks a task runs before its budget is exhausted.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Priority levels, `0` is the highest.
pub const PRIORITY_REALTIME: u32 = 0;
pub const PRIORITY_HIGH: u32 = 8;
pub const PRIORITY_NORMAL: u32 = 16;
pub const PRIORITY_LOW: u32 = 24;
pub const PRIORITY_IDLE: u32 = 31;

/// Priority assigned when the caller does not specify one.
pub const DEFAULT_PRIORITY: u32 = PRIORITY_NORMAL;

/// Longest task or process name kept, in bytes.
pub const MAX_NAME_LEN: usize = 63;

const _: () = assert!(TICK_PERIOD_MS == 10);
