//! # Direct-Map PhysMapper
//!
//! With paging off, physical and virtual addresses coincide. Once the
//! kernel directory is loaded, every frame the allocator can hand out is
//! reachable at [`DIRECT_MAP_BASE`] + `pa`; the identity map only covers the
//! kernel image and heap. [`Vmm::init`](crate::vmm::Vmm::init) flips the
//! mapper from one view to the other through [`PhysMapper::paging_enabled`].
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::phys_mapper::DirectMapPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::{PageTable, PhysMapper};
//!
//! let mapper = DirectMapPhysMapper::new();
//! unsafe {
//!     let table: &mut PageTable = mapper.phys_to_mut(PhysicalAddress::new(0x0020_0000));
//!     table.zero();
//! }
//! ```

use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::memory::{DIRECT_MAP_BASE, direct_map};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;
use log::debug;

/// [`PhysMapper`] for the kernel: identity before paging, direct map after.
///
/// # Safety
/// - Before paging is enabled every physical address is trivially reachable.
/// - Afterwards, only addresses below the direct-map size may be dereferenced.
#[derive(Debug, Default)]
pub struct DirectMapPhysMapper {
    paging: AtomicBool,
}

impl DirectMapPhysMapper {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            paging: AtomicBool::new(false),
        }
    }

    /// Virtual address `pa` is reached at under the current view.
    #[must_use]
    pub fn virtual_address(&self, pa: PhysicalAddress) -> usize {
        if self.paging.load(Ordering::Acquire) {
            direct_map(pa).as_usize()
        } else {
            pa.as_usize()
        }
    }
}

impl PhysMapper for DirectMapPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = core::ptr::with_exposed_provenance_mut::<T>(self.virtual_address(pa));
        // SAFETY: Caller must ensure the physical address is covered by the direct map.
        unsafe { &mut *va }
    }

    fn paging_enabled(&self) {
        self.paging.store(true, Ordering::Release);
        debug!("phys mapper: direct map at {DIRECT_MAP_BASE:#x} in use");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_to_direct_map_with_paging() {
        let mapper = DirectMapPhysMapper::new();
        let pa = PhysicalAddress::new(0x0123_4000);
        assert_eq!(mapper.virtual_address(pa), 0x0123_4000);

        mapper.paging_enabled();
        assert_eq!(mapper.virtual_address(pa), 0xC123_4000);
    }
}
