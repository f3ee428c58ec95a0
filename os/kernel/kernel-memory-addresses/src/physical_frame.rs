use crate::{FRAME_SHIFT, PhysicalAddress};
use core::fmt;

/// A 4 KiB physical frame, identified by its frame number (`address >> 12`).
///
/// Frames are the unit of ownership handed out by the frame allocator; no
/// per-frame object exists beyond this number.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalFrame(u32);

impl PhysicalFrame {
    /// The frame containing `addr`.
    #[inline]
    #[must_use]
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self(addr.as_u32() >> FRAME_SHIFT)
    }

    /// Construct from a frame number. Numbers above `0xFFFFF` do not exist
    /// on a 32-bit physical address bus and are truncated by [`base`](Self::base).
    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(number)
    }

    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Physical base address of the frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << FRAME_SHIFT)
    }

    /// The frame directly above this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#x} @ {})", self.0, self.base())
    }
}

impl fmt::Display for PhysicalFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
