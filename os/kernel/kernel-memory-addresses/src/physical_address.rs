use crate::{FRAME_SIZE, PhysicalFrame};
use core::fmt;
use core::ops::{Add, AddAssign};

/// A 32-bit physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
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

    /// The frame that contains this address.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalFrame {
        PhysicalFrame::containing(self)
    }

    /// Offset of this address within its frame.
    #[inline]
    #[must_use]
    pub const fn frame_offset(self) -> u32 {
        self.0 & (FRAME_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn is_frame_aligned(self) -> bool {
        self.frame_offset() == 0
    }

    /// Round up to the next frame boundary, `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn align_up(self) -> Option<Self> {
        match self.0.checked_add(FRAME_SIZE - 1) {
            Some(v) => Some(Self(v & !(FRAME_SIZE - 1))),
            None => None,
        }
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

impl Add<u32> for PhysicalAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u32) -> Self {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

impl From<u32> for PhysicalAddress {
    #[inline]
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<PhysicalAddress> for u32 {
    #[inline]
    fn from(value: PhysicalAddress) -> Self {
        value.as_u32()
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA({:#010x})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
