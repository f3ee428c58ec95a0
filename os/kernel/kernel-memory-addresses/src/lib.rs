//! # Virtual and Physical Memory Address Types (i386)
//!
//! Strongly typed wrappers for 32-bit addresses and 4 KiB page/frame numbers
//! used by the frame allocator, the paging code and the task core.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory. |
//! | [`PhysicalFrame`] | A 4 KiB physical frame, identified by `address / 4096`. |
//! | [`VirtualAddress`] | A byte address as seen through the active page directory. |
//! | [`VirtualPage`] | A 4 KiB virtual page, identified by `address / 4096`. |
//!
//! Virtual addresses split into a 10-bit directory index, a 10-bit table
//! index and a 12-bit page offset:
//!
//! ```text
//!  31            22 21            12 11              0
//! +----------------+----------------+-----------------+
//! | directory idx  |   table idx    |   page offset   |
//! +----------------+----------------+-----------------+
//! ```
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0040_1234);
//! assert_eq!(va.directory_index(), 1);
//! assert_eq!(va.table_index(), 1);
//! assert_eq!(va.page_offset(), 0x234);
//!
//! let pa = PhysicalAddress::new(0x0000_2010);
//! assert_eq!(pa.frame(), PhysicalFrame::from_number(2));
//! assert_eq!(pa.frame().base().as_u32(), 0x2000);
//! ```
//!
//! All types are `#[repr(transparent)]`, `Copy`, `Ord` and `Hash`, and all
//! arithmetic helpers are `const fn`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod physical_address;
mod physical_frame;
mod virtual_address;
mod virtual_page;

pub use physical_address::PhysicalAddress;
pub use physical_frame::PhysicalFrame;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a physical frame and of a virtual page in bytes.
pub const FRAME_SIZE: u32 = 4096;

/// `log2(FRAME_SIZE)`.
pub const FRAME_SHIFT: u32 = 12;

/// Entries per page directory and per page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes covered by one page table (one directory entry).
pub const TABLE_SPAN: u32 = FRAME_SIZE * ENTRIES_PER_TABLE as u32;

const _: () = {
    assert!(1 << FRAME_SHIFT == FRAME_SIZE);
    assert!(TABLE_SPAN == 4 * 1024 * 1024);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_roundtrip() {
        let va = VirtualAddress::new(0xC012_3ABC);
        let page = va.page();
        assert_eq!(page.base().as_u32() + va.page_offset(), va.as_u32());
        assert_eq!(page.directory_index(), va.directory_index());
        assert_eq!(page.table_index(), va.table_index());
    }

    #[test]
    fn from_indices_matches_split() {
        let va = VirtualAddress::from_indices(0x300, 0x3FF, 0x10);
        assert_eq!(va.as_u32(), 0xC03F_F010);
        assert_eq!(va.directory_index(), 0x300);
        assert_eq!(va.table_index(), 0x3FF);
    }

    #[test]
    fn frame_address_conversions() {
        let frame = PhysicalFrame::from_number(0x123);
        assert_eq!(frame.base(), PhysicalAddress::new(0x0012_3000));
        assert_eq!(PhysicalFrame::containing(PhysicalAddress::new(0x0012_3FFF)), frame);
        assert_eq!(frame.next().number(), 0x124);
        assert!(frame.base().is_frame_aligned());
        assert!(!PhysicalAddress::new(0x0012_3001).is_frame_aligned());
    }
}
