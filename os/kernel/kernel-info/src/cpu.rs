//! # Processor Constants
//!
//! Selectors refer to the flat GDT installed by the descriptor-table setup:
//! kernel code/data at entries 1 and 2, user code/data at entries 3 and 4.

/// Ring 0 code segment selector.
pub const KERNEL_CODE_SELECTOR: u32 = 0x08;

/// Ring 0 data segment selector.
pub const KERNEL_DATA_SELECTOR: u32 = 0x10;

/// Ring 3 code segment selector (`0x18 | RPL 3`).
pub const USER_CODE_SELECTOR: u32 = 0x1B;

/// Ring 3 data segment selector (`0x20 | RPL 3`).
pub const USER_DATA_SELECTOR: u32 = 0x23;

/// `EFLAGS` for a fresh task: interrupts enabled plus the always-one bit 1.
pub const DEFAULT_EFLAGS: u32 = 0x202;

/// Vector of the timer interrupt after PIC remapping; `int 0x20` forces a switch.
pub const TIMER_VECTOR: u8 = 0x20;
