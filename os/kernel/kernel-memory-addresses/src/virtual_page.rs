use crate::{FRAME_SHIFT, VirtualAddress};
use core::fmt;

/// A 4 KiB virtual page, identified by its page number (`address >> 12`).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u32);

impl VirtualPage {
    #[inline]
    #[must_use]
    pub const fn containing(addr: VirtualAddress) -> Self {
        Self(addr.as_u32() >> FRAME_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(number & 0x000F_FFFF)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.0 << FRAME_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn directory_index(self) -> usize {
        (self.0 >> 10) as usize
    }

    #[inline]
    #[must_use]
    pub const fn table_index(self) -> usize {
        (self.0 & 0x3FF) as usize
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.base())
    }
}
