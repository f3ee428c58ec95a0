//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! The three memory layers of the kernel, bottom-up:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │   Heap (FreeListHeap)            kmalloc / kfree    │
//! │    • first-fit, split, coalesce on one arena        │
//! │    • tagged headers catch double free / corruption  │
//! └─────────────────────────────────────────────────────┘
//! ┌─────────────────────────────────────────────────────┐
//! │   Virtual Memory Manager (Vmm)                      │
//! │    • kernel directory with 8 MiB identity map       │
//! │    • direct map of RAM shared by every space        │
//! │    • map / switch / clone / free address spaces     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ tables and data frames
//! ┌─────────────────▼───────────────────────────────────┐
//! │   Physical Frame Allocator (BitmapFrameAlloc)       │
//! │    • one bit per 4 KiB frame, first-fit scan        │
//! │    • frame 0 and reserved ranges never handed out   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The heap arena is a fixed, identity-mapped physical range; it does not
//! draw frames from the frame allocator at runtime.
//!
//! ## Failure model
//!
//! Nothing here aborts on exhaustion. The frame allocator returns `None`,
//! the heap returns `None`, and every multi-step operation (identity map,
//! address-space clone) hands back what it took before reporting failure.
//! Double frees of frames or heap blocks leave state untouched and surface
//! a distinguishable error.
//!
//! ## Usage
//! ```rust
//! use kernel_alloc::frame_alloc::BitmapFrameAlloc;
//! use kernel_info::boot::MemoryRegion;
//! use kernel_vmem::FrameAlloc;
//!
//! let regions = [MemoryRegion::available(0, 16 * 1024 * 1024)];
//! let mut bitmap = [0u32; 128];
//! let mut frames = BitmapFrameAlloc::init(&mut bitmap, &regions, &[]).unwrap();
//! let frame = frames.alloc_4k().unwrap();
//! frames.free_4k(frame);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod frame_alloc;
pub mod free_list;
pub mod phys_mapper;
pub mod vmm;

pub use frame_alloc::{BitmapFrameAlloc, FrameAllocError};
pub use free_list::{FreeListHeap, HeapError, HeapStats};
pub use vmm::{Vmm, VmmError};
