use crate::PagingControl;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr3::Cr3;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

/// [`PagingControl`] backed by the executing processor's `CR0`/`CR3`.
#[derive(Debug, Default)]
pub struct X86Paging;

impl PagingControl for X86Paging {
    unsafe fn load_directory(&mut self, directory: PhysicalAddress) {
        unsafe { Cr3::from_directory_phys(directory).store_unsafe() }
    }

    unsafe fn enable_paging(&mut self) {
        unsafe {
            let cr0 = Cr0::load_unsafe();
            cr0.with_pg_paging(true).store_unsafe();
        }
    }

    fn invalidate_page(&mut self, va: VirtualAddress) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
        }
    }
}
