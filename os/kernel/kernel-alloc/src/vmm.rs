//! Kernel Virtual Memory Manager (VMM).
//!
//! Owns the knowledge of which page directory is the shared kernel one and
//! which one is loaded into `CR3`. Address spaces themselves are plain
//! [`AddressSpace`] handles built on demand from a directory frame.
//!
//! # Example
//! ```ignore
//! use kernel_alloc::{frame_alloc::BitmapFrameAlloc, phys_mapper::DirectMapPhysMapper, vmm::Vmm};
//! let frame_count = frames.total_frames();
//! let mut vmm = unsafe { Vmm::init(DirectMapPhysMapper::new(), &mut frames, &mut paging, 2, frame_count)? };
//! let child = vmm.clone_kernel_space(&mut frames)?;
//! // ...
//! vmm.free_space(child, &mut frames)?;
//! ```

use kernel_info::memory::{DIRECT_MAP_FRAMES, ENTRIES_PER_TABLE, direct_map};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_sync::{InterruptControl, IrqGuard};
use kernel_vmem::{
    AddressSpace, AddressSpaceError, FrameAlloc, PageEntryBits, PagingControl, PhysMapper,
};
use log::{debug, info, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("out of physical frames")]
    OutOfFrames,
    #[error("the kernel address space is shared and cannot be released")]
    KernelAddressSpace,
    #[error("address space {0} is active")]
    ActiveAddressSpace(PhysicalFrame),
    #[error(transparent)]
    AddressSpace(AddressSpaceError),
}

impl From<AddressSpaceError> for VmmError {
    fn from(value: AddressSpaceError) -> Self {
        match value {
            AddressSpaceError::OutOfFrames => Self::OutOfFrames,
            other => Self::AddressSpace(other),
        }
    }
}

/// Kernel virtual memory manager.
pub struct Vmm<M: PhysMapper> {
    mapper: M,
    kernel: PhysicalFrame,
    current: PhysicalFrame,
}

impl<M: PhysMapper> Vmm<M> {
    /// Build the kernel directory, load it and turn paging on.
    ///
    /// The directory identity maps the first `identity_tables` × 4 MiB and
    /// direct maps frames `0..direct_frames` at `DIRECT_MAP_BASE`, all with
    /// kernel-only read/write pages. The direct-map tables are shared, so
    /// every clone reaches the same physical memory through them.
    ///
    /// # Errors
    /// [`VmmError::OutOfFrames`] if the directory or a table could not be
    /// allocated; every frame taken so far is returned first.
    ///
    /// # Safety
    /// - The identity-mapped range must cover the running kernel and its
    ///   boot stack; `direct_frames` must cover every frame `alloc` hands out.
    /// - `mapper` must reach physical memory through the direct map once
    ///   told that paging is enabled.
    /// - Must run once, at CPL0, before anything else touches paging.
    pub unsafe fn init<A, P>(
        mapper: M,
        alloc: &mut A,
        paging: &mut P,
        identity_tables: usize,
        direct_frames: u32,
    ) -> Result<Self, VmmError>
    where
        A: FrameAlloc + ?Sized,
        P: PagingControl + ?Sized,
    {
        let pages = identity_tables.min(ENTRIES_PER_TABLE) * ENTRIES_PER_TABLE;
        let pages = u32::try_from(pages).unwrap_or(u32::MAX);

        let direct_frames = direct_frames.min(DIRECT_MAP_FRAMES);

        let mut space = AddressSpace::create(&mapper, alloc)?;
        let identity = (0..pages).map(|n| {
            let frame = PhysicalFrame::from_number(n);
            (VirtualAddress::new(frame.base().as_u32()), frame)
        });
        let direct = (0..direct_frames).map(|n| {
            let frame = PhysicalFrame::from_number(n);
            (direct_map(frame.base()), frame)
        });
        for (va, frame) in identity.chain(direct) {
            if let Err(e) = space.map(alloc, va, frame, PageEntryBits::kernel_rw()) {
                let released = space.free_tables(alloc);
                warn!("vmm: kernel map failed at {va}: {e}; released {released} frames");
                return Err(e.into());
            }
        }
        let shared = space.share_tables(
            direct_map(PhysicalAddress::new(0)),
            direct_frames.saturating_mul(FRAME_SIZE),
        );

        let root = space.root();
        unsafe {
            paging.load_directory(root.base());
            paging.enable_paging();
        }
        mapper.paging_enabled();
        info!(
            "vmm: paging enabled, kernel directory at {}, {} MiB identity mapped, {} MiB direct mapped in {shared} tables",
            root.base(),
            pages / 256,
            direct_frames / 256
        );

        Ok(Self {
            mapper,
            kernel: root,
            current: root,
        })
    }

    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// The shared kernel page directory.
    #[inline]
    pub const fn kernel_directory(&self) -> PhysicalFrame {
        self.kernel
    }

    /// The directory currently loaded into `CR3`.
    #[inline]
    pub const fn current_directory(&self) -> PhysicalFrame {
        self.current
    }

    /// Handle to the kernel address space.
    pub fn kernel_space(&self) -> AddressSpace<'_, M> {
        // Safety: `kernel` was built by `init` through this mapper.
        unsafe { AddressSpace::from_root(&self.mapper, self.kernel) }
    }

    /// Handle to an arbitrary address space.
    ///
    /// # Safety
    /// `directory` must be a page directory created through this manager
    /// and not yet freed.
    pub unsafe fn space(&self, directory: PhysicalFrame) -> AddressSpace<'_, M> {
        unsafe { AddressSpace::from_root(&self.mapper, directory) }
    }

    /// Map one kernel-only, writable page in the kernel address space.
    ///
    /// # Errors
    /// - [`VmmError::OutOfFrames`] if a new page table was needed and none is left.
    /// - [`VmmError::AddressSpace`] if `va` already maps another frame.
    pub fn map_page<A, P>(
        &mut self,
        alloc: &mut A,
        paging: &mut P,
        va: VirtualAddress,
        frame: PhysicalFrame,
    ) -> Result<(), VmmError>
    where
        A: FrameAlloc + ?Sized,
        P: PagingControl + ?Sized,
    {
        self.kernel_space()
            .map(alloc, va, frame, PageEntryBits::kernel_rw())?;
        if self.current == self.kernel {
            paging.invalidate_page(va);
        }
        Ok(())
    }

    /// Remove a kernel mapping and return the frame it pointed to.
    ///
    /// # Errors
    /// [`VmmError::AddressSpace`] if `va` is not mapped.
    pub fn unmap_page<P>(&mut self, paging: &mut P, va: VirtualAddress) -> Result<PhysicalFrame, VmmError>
    where
        P: PagingControl + ?Sized,
    {
        let frame = self.kernel_space().unmap(va)?;
        if self.current == self.kernel {
            paging.invalidate_page(va);
        }
        Ok(frame)
    }

    /// Resolve `va` in the kernel address space.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.kernel_space().translate(va)
    }

    /// Load `directory` into `CR3` and record it as current.
    ///
    /// The guard proves interrupts are masked for the duration of the switch.
    ///
    /// # Safety
    /// `directory` must map the kernel identically to the kernel directory.
    pub unsafe fn switch_to<P, I>(&mut self, paging: &mut P, directory: PhysicalFrame, _irq: &IrqGuard<'_, I>)
    where
        P: PagingControl + ?Sized,
        I: InterruptControl + ?Sized,
    {
        unsafe { paging.load_directory(directory.base()) };
        self.current = directory;
        debug!("vmm: switched to directory {}", directory.base());
    }

    /// Deep-copy the address space rooted at `source`.
    ///
    /// # Errors
    /// [`VmmError::OutOfFrames`]; nothing stays allocated on failure.
    ///
    /// # Safety
    /// Same contract as [`space`](Self::space).
    pub unsafe fn clone_space<A>(&self, source: PhysicalFrame, alloc: &mut A) -> Result<PhysicalFrame, VmmError>
    where
        A: FrameAlloc + ?Sized,
    {
        let clone = unsafe { self.space(source) }.try_clone(alloc)?;
        debug!("vmm: cloned {} into {}", source.base(), clone.root_address());
        Ok(clone.root())
    }

    /// Deep-copy the kernel address space.
    ///
    /// # Errors
    /// [`VmmError::OutOfFrames`]; nothing stays allocated on failure.
    pub fn clone_kernel_space<A>(&self, alloc: &mut A) -> Result<PhysicalFrame, VmmError>
    where
        A: FrameAlloc + ?Sized,
    {
        unsafe { self.clone_space(self.kernel, alloc) }
    }

    /// Return every frame of a cloned address space to `alloc`.
    ///
    /// # Errors
    /// - [`VmmError::KernelAddressSpace`] for the shared kernel directory.
    /// - [`VmmError::ActiveAddressSpace`] for the directory loaded in `CR3`.
    ///
    /// # Safety
    /// Same contract as [`space`](Self::space); `directory` is dangling afterwards.
    pub unsafe fn free_space<A>(&mut self, directory: PhysicalFrame, alloc: &mut A) -> Result<usize, VmmError>
    where
        A: FrameAlloc + ?Sized,
    {
        if directory == self.kernel {
            warn!("vmm: refusing to free the kernel directory");
            return Err(VmmError::KernelAddressSpace);
        }
        if directory == self.current {
            warn!("vmm: refusing to free active directory {}", directory.base());
            return Err(VmmError::ActiveAddressSpace(directory));
        }
        let released = unsafe { self.space(directory) }.free(alloc);
        debug!("vmm: freed directory {}, {released} frames", directory.base());
        Ok(released)
    }
}

impl<M: PhysMapper> core::fmt::Debug for Vmm<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vmm")
            .field("kernel", &self.kernel)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_sync::SimulatedInterrupts;
    use kernel_vmem::sim::{SimFrameAlloc, SimulatedPhysicalMemory};

    #[derive(Default)]
    struct RecordingPaging {
        loaded: Vec<PhysicalAddress>,
        enabled: bool,
        invalidated: Vec<VirtualAddress>,
    }

    impl PagingControl for RecordingPaging {
        unsafe fn load_directory(&mut self, directory: PhysicalAddress) {
            self.loaded.push(directory);
        }

        unsafe fn enable_paging(&mut self) {
            self.enabled = true;
        }

        fn invalidate_page(&mut self, va: VirtualAddress) {
            self.invalidated.push(va);
        }
    }

    // 1 identity table covers frames 0..1024; allocate above that.
    fn setup() -> (SimulatedPhysicalMemory, SimFrameAlloc, RecordingPaging) {
        (
            SimulatedPhysicalMemory::new(4096),
            SimFrameAlloc::new(1024, 4096),
            RecordingPaging::default(),
        )
    }

    #[test]
    fn init_identity_maps_and_enables_paging() {
        let (mem, mut alloc, mut paging) = setup();
        let vmm = unsafe { Vmm::init(&mem, &mut alloc, &mut paging, 1, 0) }.unwrap();

        assert!(paging.enabled);
        assert_eq!(paging.loaded, vec![vmm.kernel_directory().base()]);
        assert_eq!(vmm.current_directory(), vmm.kernel_directory());
        // Directory + one table.
        assert_eq!(alloc.outstanding(), 2);

        for addr in [0x0000_0000, 0x0010_0abc, 0x003F_FFFF] {
            let va = VirtualAddress::new(addr);
            assert_eq!(vmm.translate(va), Some(PhysicalAddress::new(addr)));
        }
        assert_eq!(vmm.translate(VirtualAddress::new(0x0040_0000)), None);

        let pte = vmm.kernel_space().entry(VirtualAddress::new(0x1000)).unwrap();
        assert!(pte.writable());
        assert!(!pte.user_access());
    }

    #[test]
    fn init_rolls_back_when_tables_run_out() {
        let (mem, mut alloc, mut paging) = setup();
        alloc.set_budget(Some(2));
        let err = unsafe { Vmm::init(&mem, &mut alloc, &mut paging, 2, 0) }.unwrap_err();
        assert_eq!(err, VmmError::OutOfFrames);
        assert_eq!(alloc.outstanding(), 0);
        assert!(!paging.enabled);
    }

    #[test]
    fn map_page_invalidates_active_kernel_mapping() {
        let (mem, mut alloc, mut paging) = setup();
        let mut vmm = unsafe { Vmm::init(&mem, &mut alloc, &mut paging, 1, 0) }.unwrap();

        let frame = alloc.alloc_4k().unwrap();
        let va = VirtualAddress::new(0xC000_0000);
        vmm.map_page(&mut alloc, &mut paging, va, frame).unwrap();
        assert_eq!(vmm.translate(va), Some(frame.base()));
        assert_eq!(paging.invalidated, vec![va]);

        assert_eq!(vmm.unmap_page(&mut paging, va), Ok(frame));
        assert_eq!(
            vmm.unmap_page(&mut paging, va),
            Err(VmmError::AddressSpace(AddressSpaceError::NotMapped(va)))
        );
    }

    #[test]
    fn clone_is_deep_and_free_returns_everything() {
        let (mem, mut alloc, mut paging) = setup();
        let mut vmm = unsafe { Vmm::init(&mem, &mut alloc, &mut paging, 1, 0) }.unwrap();
        mem.fill_frame(PhysicalFrame::from_number(5), 0x5A);

        let before = alloc.outstanding();
        let child = vmm.clone_kernel_space(&mut alloc).unwrap();
        // Directory + table + 1024 data frames.
        assert_eq!(alloc.outstanding(), before + 2 + 1024);

        let child_space = unsafe { vmm.space(child) };
        let copy = child_space.translate(VirtualAddress::new(5 * FRAME_SIZE)).unwrap();
        assert_ne!(copy, PhysicalAddress::new(5 * FRAME_SIZE));
        assert_eq!(mem.read(copy, 16), vec![0x5A; 16]);

        assert_eq!(unsafe { vmm.free_space(child, &mut alloc) }, Ok(1026));
        assert_eq!(alloc.outstanding(), before);
    }

    #[test]
    fn failed_clone_leaks_nothing() {
        let (mem, mut alloc, mut paging) = setup();
        let vmm = unsafe { Vmm::init(&mem, &mut alloc, &mut paging, 1, 0) }.unwrap();
        let before = alloc.outstanding();
        alloc.set_budget(Some(100));
        assert_eq!(vmm.clone_kernel_space(&mut alloc), Err(VmmError::OutOfFrames));
        assert_eq!(alloc.outstanding(), before);
    }

    #[test]
    fn kernel_and_active_directories_are_not_freed() {
        let (mem, mut alloc, mut paging) = setup();
        let mut vmm = unsafe { Vmm::init(&mem, &mut alloc, &mut paging, 1, 0) }.unwrap();
        let kernel = vmm.kernel_directory();
        assert_eq!(
            unsafe { vmm.free_space(kernel, &mut alloc) },
            Err(VmmError::KernelAddressSpace)
        );

        let child = vmm.clone_kernel_space(&mut alloc).unwrap();
        let irq = SimulatedInterrupts::new(true);
        {
            let guard = IrqGuard::new(&irq);
            unsafe { vmm.switch_to(&mut paging, child, &guard) };
            assert!(!irq.interrupts_enabled());
        }
        assert!(irq.interrupts_enabled());
        assert_eq!(vmm.current_directory(), child);
        assert_eq!(paging.loaded.last(), Some(&child.base()));
        assert_eq!(
            unsafe { vmm.free_space(child, &mut alloc) },
            Err(VmmError::ActiveAddressSpace(child))
        );

        let guard = IrqGuard::new(&irq);
        unsafe { vmm.switch_to(&mut paging, kernel, &guard) };
        drop(guard);
        assert!(unsafe { vmm.free_space(child, &mut alloc) }.is_ok());
    }

    #[test]
    fn direct_map_is_shared_with_clones() {
        let (mem, mut alloc, mut paging) = setup();
        let mut vmm = unsafe { Vmm::init(&mem, &mut alloc, &mut paging, 1, 2048) }.unwrap();
        // Directory + identity table + two direct-map tables.
        assert_eq!(alloc.outstanding(), 4);
        let high = PhysicalFrame::from_number(2000);
        assert_eq!(vmm.translate(direct_map(high.base())), Some(high.base()));
        assert_eq!(vmm.translate(direct_map(PhysicalAddress::new(2048 * FRAME_SIZE))), None);

        let before = alloc.outstanding();
        let child = vmm.clone_kernel_space(&mut alloc).unwrap();
        assert_eq!(alloc.outstanding(), before + 2 + 1024);
        let child_space = unsafe { vmm.space(child) };
        assert_eq!(child_space.translate(direct_map(high.base())), Some(high.base()));
        for frame in child_space.owned_frames() {
            assert_eq!(vmm.translate(direct_map(frame.base())), Some(frame.base()));
        }

        assert_eq!(unsafe { vmm.free_space(child, &mut alloc) }, Ok(1026));
        assert_eq!(alloc.outstanding(), before);
        assert_eq!(vmm.translate(direct_map(high.base())), Some(high.base()));
    }
}
