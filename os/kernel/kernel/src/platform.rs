//! # Hardware Platform
//!
//! Everything the core needs from the processor: interrupt masking, the
//! paging registers, a forced timer tick and `hlt`.

use kernel_sync::InterruptControl;
use kernel_vmem::PagingControl;

pub trait Platform {
    type Interrupts: InterruptControl;
    type Paging: PagingControl;

    fn interrupts(&self) -> &Self::Interrupts;

    /// Interrupt control and paging registers at the same time, for
    /// operations that switch address spaces inside a critical section.
    fn parts(&mut self) -> (&Self::Interrupts, &mut Self::Paging);

    /// Enter the tick path synchronously, as if the timer had fired.
    ///
    /// Must not be called while the kernel state is locked; the tick needs it.
    fn raise_timer_interrupt(&self);

    /// Stop the processor until the next interrupt.
    fn halt(&self);
}

/// The executing i386 processor.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default)]
pub struct X86Platform {
    cpu: kernel_sync::Cpu,
    paging: kernel_vmem::X86Paging,
}

#[cfg(target_arch = "x86")]
impl X86Platform {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cpu: kernel_sync::Cpu,
            paging: kernel_vmem::X86Paging,
        }
    }
}

#[cfg(target_arch = "x86")]
impl Platform for X86Platform {
    type Interrupts = kernel_sync::Cpu;
    type Paging = kernel_vmem::X86Paging;

    #[inline]
    fn interrupts(&self) -> &Self::Interrupts {
        &self.cpu
    }

    #[inline]
    fn parts(&mut self) -> (&Self::Interrupts, &mut Self::Paging) {
        (&self.cpu, &mut self.paging)
    }

    #[inline]
    fn raise_timer_interrupt(&self) {
        unsafe {
            core::arch::asm!(
                "int {vector}",
                vector = const kernel_info::cpu::TIMER_VECTOR,
                options(nomem)
            );
        }
    }

    #[inline]
    fn halt(&self) {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack, preserves_flags)) }
    }
}
