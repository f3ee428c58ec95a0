//! # Kernel Core
//!
//! Wires the memory and task subsystems together in boot order:
//!
//! ```text
//!   memory map ──► BitmapFrameAlloc ──► Vmm (identity + direct map, paging on)
//!                                         │
//!                        KernelHeap ◄─────┘  (arena inside the identity map)
//!                            │
//!                        Scheduler (idle task = boot context) ──► ProcessTable
//! ```
//!
//! [`Kernel`] owns every piece of mutable kernel state. The timer interrupt
//! feeds it through [`Kernel::timer_tick`]; everything else goes through the
//! task, process, frame and mapping facade, each call bracketed by an
//! [`IrqGuard`](kernel_sync::IrqGuard).
//!
//! The hardware is reached only through the [`Platform`] trait, so the whole
//! kernel boots and schedules on the host against simulated physical memory.
//! On an i386 bare-metal target the [`x86`] module holds the single global
//! instance, the interrupt entry and the global allocator.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod heap;
pub mod kernel;
pub mod pic;
pub mod platform;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;

pub use heap::KernelHeap;
pub use kernel::{BootError, BootParams, HeapArena, Kernel};
pub use platform::Platform;
#[cfg(target_arch = "x86")]
pub use platform::X86Platform;
