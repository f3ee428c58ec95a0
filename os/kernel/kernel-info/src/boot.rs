//! # Boot Memory Map
//!
//! The frame allocator is initialised from a list of `(base, length, kind)`
//! descriptors. On a Multiboot2 boot they come from the memory-map tag
//! (type 6) of the boot information structure:
//!
//! ```text
//! info:  u32 total_size | u32 reserved | tag | tag | ... | end tag (type 0)
//! tag:   u32 type | u32 size | payload, next tag at (size + 7) & !7
//! mmap:  u32 type=6 | u32 size | u32 entry_size | u32 entry_version | entries
//! entry: u64 base | u64 length | u32 type | u32 reserved
//! ```

/// Magic value at the start of the Multiboot2 header in the kernel image.
pub const MULTIBOOT2_HEADER_MAGIC: u32 = 0xE852_50D6;

/// Value a Multiboot2 loader leaves in `EAX` when entering the kernel.
pub const MULTIBOOT2_BOOTLOADER_MAGIC: u32 = 0x36D7_6289;

/// Tag type of the Multiboot2 memory map.
pub const MULTIBOOT2_TAG_MMAP: u32 = 6;

/// Tag type terminating the Multiboot2 tag list.
pub const MULTIBOOT2_TAG_END: u32 = 0;

/// Classification of a physical memory range.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryRegionKind {
    /// Usable RAM.
    Available,
    /// ACPI tables, reclaimable once parsed.
    AcpiReclaimable,
    /// ACPI non-volatile storage.
    AcpiNvs,
    /// Defective RAM.
    BadMemory,
    /// Anything else, including firmware and MMIO.
    Reserved,
}

impl MemoryRegionKind {
    /// Map a Multiboot2 memory type code.
    #[must_use]
    pub const fn from_multiboot2(code: u32) -> Self {
        match code {
            1 => Self::Available,
            3 => Self::AcpiReclaimable,
            4 => Self::AcpiNvs,
            5 => Self::BadMemory,
            _ => Self::Reserved,
        }
    }
}

/// One entry of the boot memory map.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self { base, length, kind }
    }

    #[must_use]
    pub const fn available(base: u64, length: u64) -> Self {
        Self::new(base, length, MemoryRegionKind::Available)
    }

    /// Exclusive end address, saturating at `u64::MAX`.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.kind == MemoryRegionKind::Available
    }
}

/// Iterator over the memory-map entries of a Multiboot2 information block.
///
/// Malformed input ends the iteration instead of reading out of bounds.
#[derive(Debug, Clone)]
pub struct Multiboot2MemoryMap<'a> {
    entries: &'a [u8],
    entry_size: usize,
    offset: usize,
}

impl<'a> Multiboot2MemoryMap<'a> {
    const ENTRY_MIN_SIZE: usize = 24;

    /// Locate the memory-map tag in a Multiboot2 information block.
    ///
    /// `info` starts at the `total_size` field. Returns `None` if no memory
    /// map tag is present.
    #[must_use]
    pub fn parse(info: &'a [u8]) -> Option<Self> {
        let total = read_u32(info, 0)? as usize;
        let info = info.get(..total.min(info.len()))?;

        let mut offset: usize = 8;
        while offset.checked_add(8)? <= info.len() {
            let tag_type = read_u32(info, offset)?;
            let tag_size = read_u32(info, offset + 4)? as usize;
            if tag_type == MULTIBOOT2_TAG_END || tag_size < 8 {
                return None;
            }

            if tag_type == MULTIBOOT2_TAG_MMAP {
                let tag = info.get(offset..offset.checked_add(tag_size)?)?;
                let entry_size = read_u32(tag, 8)? as usize;
                if entry_size < Self::ENTRY_MIN_SIZE {
                    return None;
                }
                return Some(Self {
                    entries: tag.get(16..)?,
                    entry_size,
                    offset: 0,
                });
            }

            offset = offset.checked_add(tag_size.checked_add(7)? & !7)?;
        }
        None
    }
}

impl Iterator for Multiboot2MemoryMap<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self
            .entries
            .get(self.offset..self.offset.checked_add(self.entry_size)?)?;
        self.offset += self.entry_size;

        let base = read_u64(entry, 0)?;
        let length = read_u64(entry, 8)?;
        let kind = MemoryRegionKind::from_multiboot2(read_u32(entry, 16)?);
        Some(MemoryRegion::new(base, length, kind))
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw = bytes.get(at..at.checked_add(8)?)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn build_info(entries: &[(u64, u64, u32)]) -> Vec<u8> {
        let mut info = Vec::new();
        push_u32(&mut info, 0); // total_size, patched below
        push_u32(&mut info, 0);

        // An unrelated tag (boot loader name) of odd length to exercise padding.
        push_u32(&mut info, 2);
        push_u32(&mut info, 13);
        info.extend_from_slice(b"grub\0");
        info.resize(info.len() + 3, 0);

        let tag_size = 16 + 24 * entries.len();
        push_u32(&mut info, MULTIBOOT2_TAG_MMAP);
        push_u32(&mut info, u32::try_from(tag_size).unwrap());
        push_u32(&mut info, 24);
        push_u32(&mut info, 0);
        for &(base, len, kind) in entries {
            push_u64(&mut info, base);
            push_u64(&mut info, len);
            push_u32(&mut info, kind);
            push_u32(&mut info, 0);
        }

        push_u32(&mut info, MULTIBOOT2_TAG_END);
        push_u32(&mut info, 8);

        let total = u32::try_from(info.len()).unwrap();
        info[..4].copy_from_slice(&total.to_le_bytes());
        info
    }

    #[test]
    fn parses_entries_after_other_tags() {
        let info = build_info(&[(0, 0x9_FC00, 1), (0xF_0000, 0x1_0000, 2), (0x10_0000, 0x7F0_0000, 1)]);
        let regions: Vec<_> = Multiboot2MemoryMap::parse(&info).unwrap().collect();
        assert_eq!(
            regions,
            vec![
                MemoryRegion::available(0, 0x9_FC00),
                MemoryRegion::new(0xF_0000, 0x1_0000, MemoryRegionKind::Reserved),
                MemoryRegion::available(0x10_0000, 0x7F0_0000),
            ]
        );
    }

    #[test]
    fn missing_tag_yields_none() {
        let mut info = Vec::new();
        push_u32(&mut info, 16);
        push_u32(&mut info, 0);
        push_u32(&mut info, MULTIBOOT2_TAG_END);
        push_u32(&mut info, 8);
        assert!(Multiboot2MemoryMap::parse(&info).is_none());
    }

    #[test]
    fn truncated_info_does_not_overrun() {
        let info = build_info(&[(0, 0x10_0000, 1)]);
        let cut = &info[..info.len() - 20];
        let count = Multiboot2MemoryMap::parse(cut).map_or(0, Iterator::count);
        assert!(count <= 1);
    }

    #[test]
    fn oversized_tag_stops_parsing() {
        let mut info = Vec::new();
        push_u32(&mut info, 32);
        push_u32(&mut info, 0);
        // Boot loader name tag claiming the whole 32-bit range.
        push_u32(&mut info, 2);
        push_u32(&mut info, u32::MAX);
        push_u32(&mut info, MULTIBOOT2_TAG_MMAP);
        push_u32(&mut info, 40);
        push_u32(&mut info, 24);
        push_u32(&mut info, 0);
        assert!(Multiboot2MemoryMap::parse(&info).is_none());
    }
}
