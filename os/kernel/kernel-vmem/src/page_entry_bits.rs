use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame};

/// A 32-bit i386 page directory or page table entry in its raw bitfield form.
///
/// Directory entries and table entries share this layout. A directory entry
/// points to a page table; a table entry maps one 4 KiB page.
///
/// ### Bit layout
///
/// | Bits  | Name       | Meaning |
/// |-------|------------|---------|
/// | 0     | `P`        | Present |
/// | 1     | `RW`       | Writable |
/// | 2     | `US`       | User-mode accessible |
/// | 3     | `PWT`      | Write-through caching |
/// | 4     | `PCD`      | Cache disable |
/// | 5     | `A`        | Accessed (set by the CPU) |
/// | 6     | `D`        | Dirty (table entries only) |
/// | 7     | `PS`/`PAT` | Must be 0 in a directory without PSE |
/// | 8     | `G`        | Global (table entries only) |
/// | 9     | shared     | Kernel use: directory entry links a table shared by every address space |
/// | 10–11 | available  | Free for kernel use |
/// | 12–31 | frame      | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// # use kernel_memory_addresses::PhysicalFrame;
/// let e = PageEntryBits::kernel_rw().with_frame(PhysicalFrame::from_number(0x123));
/// assert!(e.present() && e.writable() && !e.user_access());
/// assert_eq!(e.into_bits(), 0x0012_3003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2). Clear restricts access to ring 0.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    pub accessed: bool,

    /// Dirty (D, bit 6).
    pub dirty: bool,

    /// Page Size / PAT (bit 7). Always written as 0.
    pub page_size: bool,

    /// Global (G, bit 8).
    pub global: bool,

    /// Bit 9, ignored by the MMU. Set on directory entries whose table is
    /// shared between address spaces instead of owned by one.
    pub shared: bool,

    /// Bits 10–11, ignored by the MMU.
    #[bits(2)]
    pub os_available: u8,

    /// Bits 12–31, physical frame number.
    #[bits(20)]
    frame_number: u32,
}

impl PageEntryBits {
    /// Bits copied when duplicating a mapping: present, writable, user.
    const PERMISSION_MASK: u32 = 0b111;

    /// Present, writable, supervisor only.
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Present, read-only, supervisor only.
    #[must_use]
    pub const fn kernel_ro() -> Self {
        Self::new().with_present(true)
    }

    /// Present, writable, user accessible.
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::kernel_rw().with_user_access(true)
    }

    /// Flags for a directory entry linking a freshly created page table.
    #[must_use]
    pub const fn table_link() -> Self {
        Self::kernel_rw()
    }

    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalFrame {
        PhysicalFrame::from_number(self.frame_number())
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(self) -> PhysicalAddress {
        self.frame().base()
    }

    /// Replace the frame, keeping all flag bits.
    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalFrame) -> Self {
        self.with_frame_number(frame.number() & 0x000F_FFFF)
    }

    #[inline]
    pub fn set_frame(&mut self, frame: PhysicalFrame) {
        self.set_frame_number(frame.number() & 0x000F_FFFF);
    }

    /// Only the present/writable/user bits of this entry.
    #[inline]
    #[must_use]
    pub const fn permissions(self) -> Self {
        Self::from_bits(self.into_bits() & Self::PERMISSION_MASK)
    }

    /// Clear the entry (not present, no frame).
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_bits() {
        let e = PageEntryBits::user_rw().with_frame(PhysicalFrame::from_number(7));
        assert_eq!(e.into_bits(), 0x0000_7007);
        assert_eq!(e.physical_address(), PhysicalAddress::new(0x7000));
    }

    #[test]
    fn shared_bit_is_software_only() {
        let e = PageEntryBits::table_link().with_shared(true);
        assert_eq!(e.into_bits(), 0x0000_0203);
        assert!(!e.permissions().shared());
    }

    #[test]
    fn permissions_drop_hardware_bits() {
        let e = PageEntryBits::kernel_rw()
            .with_accessed(true)
            .with_dirty(true)
            .with_frame(PhysicalFrame::from_number(0x42));
        assert_eq!(e.permissions().into_bits(), 0b011);
    }
}
