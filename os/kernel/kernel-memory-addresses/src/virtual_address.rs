use crate::{FRAME_SHIFT, FRAME_SIZE, VirtualPage};
use core::fmt;
use core::ops::Add;

/// A 32-bit virtual memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Compose an address from directory index, table index and page offset.
    ///
    /// Indices are masked to 10 bits, the offset to 12 bits.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_indices(directory: usize, table: usize, offset: u32) -> Self {
        let dir = (directory as u32 & 0x3FF) << 22;
        let tbl = (table as u32 & 0x3FF) << FRAME_SHIFT;
        Self(dir | tbl | (offset & (FRAME_SIZE - 1)))
    }

    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self(ptr as usize as u32)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Index into the page directory (bits 31..22).
    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.0 >> 22) as usize
    }

    /// Index into the page table (bits 21..12).
    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        ((self.0 >> FRAME_SHIFT) & 0x3FF) as usize
    }

    /// Offset within the page (bits 11..0).
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0 & (FRAME_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::containing(self)
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u32) -> Self {
        Self(self.0 + rhs)
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA({:#010x})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
