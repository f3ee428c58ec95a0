use crate::PageEntryBits;
use kernel_memory_addresses::ENTRIES_PER_TABLE;

/// One 4 KiB paging structure: 1024 entries of 32 bits.
///
/// The same layout serves as page directory (entries link page tables) and
/// as page table (entries map pages); see [`PageDirectory`].
#[doc(alias = "PageDirectory")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

/// A page directory. Each present entry links one [`PageTable`] covering 4 MiB.
pub type PageDirectory = PageTable;

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// A table with every entry not present.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntryBits::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Clear all entries in place.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::new());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageEntryBits {
        self.entries[index]
    }

    #[inline]
    pub const fn get_mut(&mut self, index: usize) -> &mut PageEntryBits {
        &mut self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageEntryBits) {
        self.entries[index] = entry;
    }

    /// Iterate `(index, entry)` over present entries.
    pub fn present(&self) -> impl Iterator<Item = (usize, PageEntryBits)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.present())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalFrame;

    #[test]
    fn zeroed_table_has_no_present_entries() {
        let t = PageTable::zeroed();
        assert!(t.is_empty());
        assert_eq!(core::mem::align_of::<PageTable>(), 4096);
    }

    #[test]
    fn present_iterates_in_index_order() {
        let mut t = PageTable::zeroed();
        t.set(900, PageEntryBits::kernel_rw().with_frame(PhysicalFrame::from_number(2)));
        t.set(3, PageEntryBits::kernel_rw().with_frame(PhysicalFrame::from_number(1)));
        let idx: Vec<_> = t.present().map(|(i, _)| i).collect();
        assert_eq!(idx, vec![3, 900]);

        t.get_mut(3).clear();
        assert_eq!(t.present().count(), 1);
        t.zero();
        assert!(t.is_empty());
    }
}
