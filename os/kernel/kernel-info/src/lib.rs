//! # Kernel Configuration and Boot Interface
//!
//! This crate is the single source of truth for the fixed facts the kernel
//! core is built around: the physical and virtual memory layout, the segment
//! selectors a fresh task is seeded with, timer and scheduling constants, and
//! the shape of the boot-time memory map.
//!
//! ## Modules
//!
//! * [`memory`]: frame size, kernel image placement, identity map and heap arena.
//! * [`cpu`]: segment selectors, initial `EFLAGS`, the timer interrupt vector.
//! * [`sched`]: timer frequency, tick period, priorities and time slices.
//! * [`boot`]: memory-region descriptors and Multiboot2 memory-map parsing.
//! * [`config`]: the runtime [`KernelConfig`](config::KernelConfig) record.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000  +---------------------------+  frame 0, firmware (always reserved)
//!              |  low memory               |
//! 0x0010_0000  +---------------------------+  KERNEL_PHYS_START
//!              |  kernel image             |
//!              |  frame bitmap             |  placed directly after the image
//!              +---------------------------+
//!              |  free frames              |
//! 0x0040_0000  +---------------------------+  HEAP_START
//!              |  kernel heap arena (1 MiB)|
//! 0x0050_0000  +---------------------------+
//!              |  free frames              |
//! 0x0080_0000  +---------------------------+  end of the boot identity map
//! ```
//!
//! Everything below 8 MiB is identity mapped by the kernel page directory,
//! so physical and virtual addresses coincide for the kernel image and heap.
//! Page tables, cloned pages and task stacks may live anywhere in RAM and
//! are reached through the direct map at `DIRECT_MAP_BASE + pa` (up to
//! 1 GiB), whose tables every address space shares.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod boot;
pub mod config;
pub mod cpu;
pub mod memory;
pub mod sched;
