//! # Address Space (i386, directory-rooted)
//!
//! A handle to one two-level translation tree rooted at a page-directory
//! frame. The handle does not own the frames; [`AddressSpace::free`] hands
//! them back to the allocator explicitly.
//!
//! - [`AddressSpace::get_entry`] / [`AddressSpace::get_or_create_entry`]
//!   look up a page-table entry, optionally creating the covering table.
//! - [`AddressSpace::map`] / [`AddressSpace::unmap`] install and remove one
//!   4 KiB mapping.
//! - [`AddressSpace::translate`] resolves a virtual address.
//! - [`AddressSpace::try_clone`] duplicates the whole tree eagerly.
//! - [`AddressSpace::share_tables`] marks tables that clones link to
//!   instead of copying (the direct map). Shared tables are never freed
//!   through a clone.
//!
//! Mutating the active address space requires TLB maintenance by the caller.

use crate::{FrameAlloc, PageEntryBits, PageTable, PhysMapper};
use core::fmt;
use core::iter;
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};
use log::trace;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AddressSpaceError {
    #[error("out of physical frames")]
    OutOfFrames,
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("{0} is already mapped to a different frame")]
    AlreadyMapped(VirtualAddress),
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalFrame,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Allocate and zero a new, empty page directory.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfFrames`] if no frame is left for the directory.
    pub fn create<A: FrameAlloc + ?Sized>(
        mapper: &'m M,
        alloc: &mut A,
    ) -> Result<Self, AddressSpaceError> {
        let root = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfFrames)?;
        let mut space = Self { root, mapper };
        space.directory_mut().zero();
        Ok(space)
    }

    /// Wrap an existing page directory.
    ///
    /// # Safety
    /// `root` must hold a valid page directory whose tables are reachable
    /// through `mapper`, and no other handle may mutate it concurrently.
    #[inline]
    pub const unsafe fn from_root(mapper: &'m M, root: PhysicalFrame) -> Self {
        Self { root, mapper }
    }

    /// The page-directory frame.
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalFrame {
        self.root
    }

    /// Physical address to load into `CR3`.
    #[inline]
    #[must_use]
    pub const fn root_address(&self) -> PhysicalAddress {
        self.root.base()
    }

    #[inline]
    fn directory(&self) -> &PageTable {
        unsafe { self.mapper.phys_to_mut(self.root.base()) }
    }

    #[inline]
    fn directory_mut(&mut self) -> &mut PageTable {
        unsafe { self.mapper.phys_to_mut(self.root.base()) }
    }

    #[inline]
    fn table(&self, frame: PhysicalFrame) -> &PageTable {
        unsafe { self.mapper.phys_to_mut(frame.base()) }
    }

    #[inline]
    fn table_mut(&mut self, frame: PhysicalFrame) -> &mut PageTable {
        unsafe { self.mapper.phys_to_mut(frame.base()) }
    }

    /// The page-table entry for `va`, if its table exists.
    ///
    /// The entry itself may be not present.
    pub fn get_entry(&mut self, va: VirtualAddress) -> Option<&mut PageEntryBits> {
        let pde = self.directory().get(va.directory_index());
        if !pde.present() {
            return None;
        }
        Some(self.table_mut(pde.frame()).get_mut(va.table_index()))
    }

    /// The page-table entry for `va`, creating and linking a zeroed table
    /// if the covering directory slot is empty.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfFrames`] if a table is needed but no frame is left.
    pub fn get_or_create_entry<A: FrameAlloc + ?Sized>(
        &mut self,
        va: VirtualAddress,
        alloc: &mut A,
    ) -> Result<&mut PageEntryBits, AddressSpaceError> {
        let index = va.directory_index();
        let mut pde = self.directory().get(index);
        if !pde.present() {
            let frame = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfFrames)?;
            self.table_mut(frame).zero();
            pde = PageEntryBits::table_link().with_frame(frame);
            self.directory_mut().set(index, pde);
            trace!("directory {}: new table {frame:?} at slot {index}", self.root);
        }
        Ok(self.table_mut(pde.frame()).get_mut(va.table_index()))
    }

    /// A copy of the entry mapping `va`, if present.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        let pde = self.directory().get(va.directory_index());
        if !pde.present() {
            return None;
        }
        let pte = self.table(pde.frame()).get(va.table_index());
        pte.present().then_some(pte)
    }

    /// Map the page containing `va` to `frame` with `flags`.
    ///
    /// Remapping the same frame only updates the flags. User mappings also
    /// open the covering directory entry to ring 3.
    ///
    /// # Errors
    /// - [`AddressSpaceError::OutOfFrames`] if the covering table could not be created.
    /// - [`AddressSpaceError::AlreadyMapped`] if `va` maps a different frame.
    pub fn map<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        frame: PhysicalFrame,
        flags: PageEntryBits,
    ) -> Result<(), AddressSpaceError> {
        let entry = self.get_or_create_entry(va, alloc)?;
        if entry.present() && entry.frame() != frame {
            return Err(AddressSpaceError::AlreadyMapped(va));
        }
        *entry = flags.with_present(true).with_frame(frame);

        if flags.user_access() {
            self.directory_mut()
                .get_mut(va.directory_index())
                .set_user_access(true);
        }
        Ok(())
    }

    /// Remove the mapping for `va` and return the frame it pointed to.
    ///
    /// The frame is not freed; the caller owns it.
    ///
    /// # Errors
    /// [`AddressSpaceError::NotMapped`] if nothing is mapped at `va`.
    pub fn unmap(&mut self, va: VirtualAddress) -> Result<PhysicalFrame, AddressSpaceError> {
        let entry = self
            .get_entry(va)
            .filter(|e| e.present())
            .ok_or(AddressSpaceError::NotMapped(va))?;
        let frame = entry.frame();
        entry.clear();
        Ok(frame)
    }

    /// Resolve `va` to a physical address.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.entry(va)
            .map(|pte| pte.physical_address() + va.page_offset())
    }

    /// All present mappings as `(page base, entry)`, in address order.
    pub fn mappings(&self) -> impl Iterator<Item = (VirtualAddress, PageEntryBits)> + '_ {
        self.directory().present().flat_map(move |(di, pde)| {
            self.table(pde.frame())
                .present()
                .map(move |(ti, pte)| (VirtualAddress::from_indices(di, ti, 0), pte))
        })
    }

    /// Flag the tables covering `[start, start + len)` as shared.
    ///
    /// Clones link shared tables instead of copying them, and
    /// [`free`](Self::free) / [`free_tables`](Self::free_tables) leave them
    /// alone. Returns the number of tables flagged.
    pub fn share_tables(&mut self, start: VirtualAddress, len: u32) -> usize {
        if len == 0 {
            return 0;
        }
        let first = start.directory_index();
        let last = VirtualAddress::new(start.as_u32().saturating_add(len - 1)).directory_index();
        let mut shared = 0;
        for index in first..=last {
            let pde = self.directory_mut().get_mut(index);
            if pde.present() {
                pde.set_shared(true);
                shared += 1;
            }
        }
        shared
    }

    /// Frames this space owns: the directory, its unshared tables and every
    /// page those tables map. Exactly what [`free`](Self::free) releases.
    pub fn owned_frames(&self) -> impl Iterator<Item = PhysicalFrame> + '_ {
        let owned = self
            .directory()
            .present()
            .filter(|(_, pde)| !pde.shared())
            .flat_map(move |(_, pde)| {
                iter::once(pde.frame())
                    .chain(self.table(pde.frame()).present().map(|(_, pte)| pte.frame()))
            });
        iter::once(self.root).chain(owned)
    }

    /// Number of page tables linked from the directory.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.directory().present().count()
    }

    /// Duplicate this address space eagerly.
    ///
    /// Every present table gets a new table; every present page gets a new
    /// frame holding a byte-for-byte copy, installed with the same
    /// present/writable/user bits. Shared tables are linked, not copied. On
    /// failure everything allocated so far is returned to `alloc`.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfFrames`] if the copy could not be completed.
    pub fn try_clone<A: FrameAlloc + ?Sized>(
        &self,
        alloc: &mut A,
    ) -> Result<AddressSpace<'m, M>, AddressSpaceError> {
        let mut clone = Self::create(self.mapper, alloc)?;
        match self.copy_into(&mut clone, alloc) {
            Ok(()) => Ok(clone),
            Err(e) => {
                let released = clone.free(alloc);
                trace!("clone of {} failed, released {released} frames", self.root);
                Err(e)
            }
        }
    }

    fn copy_into<A: FrameAlloc + ?Sized>(
        &self,
        dst: &mut Self,
        alloc: &mut A,
    ) -> Result<(), AddressSpaceError> {
        for (di, src_pde) in self.directory().present() {
            if src_pde.shared() {
                dst.directory_mut().set(di, src_pde);
                continue;
            }

            let table = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfFrames)?;
            dst.table_mut(table).zero();
            dst.directory_mut()
                .set(di, src_pde.permissions().with_frame(table));

            for (ti, src_pte) in self.table(src_pde.frame()).present() {
                let frame = alloc.alloc_4k().ok_or(AddressSpaceError::OutOfFrames)?;
                let source = src_pte.frame();
                if frame != source {
                    unsafe {
                        let from = self.mapper.frame_bytes(source);
                        self.mapper.frame_bytes(frame).copy_from_slice(from);
                    }
                }
                dst.table_mut(table)
                    .set(ti, src_pte.permissions().with_frame(frame));
            }
        }
        Ok(())
    }

    /// Release every data frame, every unshared table frame and finally the
    /// directory.
    ///
    /// Returns the number of frames handed back. Must not be used on an
    /// address space whose pages are not its own (such as the kernel's
    /// identity map).
    pub fn free<A: FrameAlloc + ?Sized>(self, alloc: &mut A) -> usize {
        let mut released = 0;
        for (_, pde) in self.directory().present().filter(|(_, pde)| !pde.shared()) {
            for (_, pte) in self.table(pde.frame()).present() {
                alloc.free_4k(pte.frame());
                released += 1;
            }
            alloc.free_4k(pde.frame());
            released += 1;
        }
        alloc.free_4k(self.root);
        released + 1
    }

    /// Release the unshared table frames and the directory but leave mapped
    /// frames alone, for spaces that only map memory they do not own.
    pub fn free_tables<A: FrameAlloc + ?Sized>(self, alloc: &mut A) -> usize {
        let mut released = 0;
        for (_, pde) in self.directory().present().filter(|(_, pde)| !pde.shared()) {
            alloc.free_4k(pde.frame());
            released += 1;
        }
        alloc.free_4k(self.root);
        released + 1
    }
}

impl<M: PhysMapper> fmt::Debug for AddressSpace<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
