//! # Virtual Memory Support (i386 two-level paging)
//!
//! Typed page directories and tables plus an [`AddressSpace`] handle that
//! builds, queries, duplicates and tears down one translation tree.
//!
//! ```text
//! CR3 ──► Page Directory (1024 × PDE) ──► Page Table (1024 × PTE) ──► 4 KiB frame
//!          index = VA[31:22]               index = VA[21:12]          offset = VA[11:0]
//! ```
//!
//! ## Collaborators
//!
//! The crate does not own physical memory. It is parameterised over:
//!
//! - [`FrameAlloc`]: hands out and takes back 4 KiB frames for tables and data.
//! - [`PhysMapper`]: turns a physical address into a usable reference. The
//!   kernel goes through its direct map once paging is on; tests back it
//!   with [`sim::SimulatedPhysicalMemory`].
//! - [`PagingControl`]: loads `CR3`, sets `CR0.PG` and invalidates TLB entries.
//!
//! ## Invariants
//!
//! - Page tables are created lazily, the first time a mapping lands in their
//!   4 MiB region.
//! - Every present entry of a non-kernel address space owns its frame, except
//!   those under a shared table; freeing the address space returns data
//!   frames, then table frames, then the directory frame.
//! - Cloning is an eager deep copy: every mapped page gets a new frame with
//!   identical contents and identical permission bits.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry_bits;
mod page_table;
#[cfg(target_arch = "x86")]
mod paging;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(any(test, feature = "sim"))]
extern crate alloc;

pub use crate::address_space::{AddressSpace, AddressSpaceError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{PageDirectory, PageTable};
#[cfg(target_arch = "x86")]
pub use crate::paging::X86Paging;

use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Source of physical 4 KiB frames.
///
/// `alloc_4k` returns `None` on exhaustion; callers propagate that as an
/// error and unwind any partial work. Frames are not zeroed.
pub trait FrameAlloc {
    /// Allocate one 4 KiB physical frame.
    fn alloc_4k(&mut self) -> Option<PhysicalFrame>;

    /// Return a frame previously obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, frame: PhysicalFrame);
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalFrame> {
        (**self).alloc_4k()
    }

    #[inline]
    fn free_4k(&mut self, frame: PhysicalFrame) {
        (**self).free_4k(frame);
    }
}

/// Converts physical addresses to references in the current virtual address
/// space.
pub trait PhysMapper {
    /// Convert a physical address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current address space.
    /// - The bytes at `pa` must be a valid `T`, suitably aligned.
    /// - The caller must not create overlapping references for `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Called once paging has been switched on, for mappers whose view of
    /// physical memory changes with it.
    #[inline]
    fn paging_enabled(&self) {}

    /// The raw bytes of a whole frame.
    ///
    /// # Safety
    /// Same requirements as [`phys_to_mut`](Self::phys_to_mut).
    #[inline]
    unsafe fn frame_bytes<'a>(&self, frame: PhysicalFrame) -> &'a mut [u8; FRAME_SIZE as usize] {
        unsafe { self.phys_to_mut(frame.base()) }
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { (**self).phys_to_mut(pa) }
    }

    #[inline]
    fn paging_enabled(&self) {
        (**self).paging_enabled();
    }
}

/// Processor-level paging controls.
pub trait PagingControl {
    /// Load the translation base register with a page directory.
    ///
    /// # Safety
    /// `directory` must be a valid page directory that maps the currently
    /// executing code, stack and all kernel data.
    unsafe fn load_directory(&mut self, directory: PhysicalAddress);

    /// Set the paging-enable bit.
    ///
    /// # Safety
    /// A valid directory must already be loaded.
    unsafe fn enable_paging(&mut self);

    /// Drop a stale translation after a mapping in the active space changed.
    fn invalidate_page(&mut self, va: VirtualAddress);
}

/// Align `x` down to the nearest multiple of `a` (a power of two).
///
/// ```rust
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a` (a power of two).
///
/// `x + (a - 1)` must not overflow.
///
/// ```rust
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// assert_eq!(align_up(0x12345, 16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    (x + a - 1) & !(a - 1)
}
