//! # Saved Register Snapshot
//!
//! Layout of the frame the interrupt entry builds on the stack, lowest
//! address first:
//!
//! ```text
//! gs fs es ds | edi esi ebp esp ebx edx ecx eax | eip cs eflags | useresp ss
//! └ pushed by ┘ └──────────── pushad ──────────┘ └── CPU ──────┘ └ ring 3 ┘
//!   the stub
//! ```
//!
//! `esp` holds the stack pointer the task resumes with. For ring 3 tasks the
//! CPU restores the user stack from `useresp` and `ss`.

use kernel_info::cpu::{
    DEFAULT_EFLAGS, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, USER_CODE_SELECTOR,
    USER_DATA_SELECTOR,
};
use kernel_info::memory::STACK_SAFETY_MARGIN;
use kernel_memory_addresses::VirtualAddress;

/// Privilege ring a task executes in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Ring {
    Kernel = 0,
    User = 3,
}

impl Ring {
    /// Code segment selector for this ring.
    #[must_use]
    pub const fn code_selector(self) -> u32 {
        match self {
            Self::Kernel => KERNEL_CODE_SELECTOR,
            Self::User => USER_CODE_SELECTOR,
        }
    }

    /// Data and stack segment selector for this ring.
    #[must_use]
    pub const fn data_selector(self) -> u32 {
        match self {
            Self::Kernel => KERNEL_DATA_SELECTOR,
            Self::User => USER_DATA_SELECTOR,
        }
    }

    /// Ring encoded in the requested privilege level of a selector.
    #[must_use]
    pub const fn of_selector(selector: u32) -> Self {
        if selector & 3 == 3 { Self::User } else { Self::Kernel }
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[repr(C)]
pub struct SavedRegisters {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub useresp: u32,
    pub ss: u32,
}

impl SavedRegisters {
    /// Selectors and flags for code already running in `ring`; all general
    /// purpose registers zero.
    #[must_use]
    pub const fn for_ring(ring: Ring) -> Self {
        let data = ring.data_selector();
        Self {
            gs: data,
            fs: data,
            es: data,
            ds: data,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            eip: 0,
            cs: ring.code_selector(),
            eflags: DEFAULT_EFLAGS,
            useresp: 0,
            ss: data,
        }
    }

    /// Initial snapshot of a fresh task: resume at `entry` with interrupts
    /// enabled and the stack pointer a small margin below `stack_top`.
    #[must_use]
    pub const fn for_entry(entry: VirtualAddress, stack_top: VirtualAddress, ring: Ring) -> Self {
        let sp = stack_top.as_u32().saturating_sub(STACK_SAFETY_MARGIN);
        let mut regs = Self::for_ring(ring);
        regs.eip = entry.as_u32();
        regs.esp = sp;
        regs.ebp = sp;
        if matches!(ring, Ring::User) {
            regs.useresp = sp;
        }
        regs
    }

    /// Privilege ring the snapshot resumes into.
    #[must_use]
    pub const fn ring(&self) -> Ring {
        Ring::of_selector(self.cs)
    }

    /// Stack pointer the task continues with after the interrupt return.
    #[must_use]
    pub const fn resume_stack(&self) -> u32 {
        match self.ring() {
            Ring::Kernel => self.esp,
            Ring::User => self.useresp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_matches_entry_stub() {
        assert_eq!(size_of::<SavedRegisters>(), 17 * 4);
        assert_eq!(core::mem::offset_of!(SavedRegisters, edi), 16);
        assert_eq!(core::mem::offset_of!(SavedRegisters, eax), 44);
        assert_eq!(core::mem::offset_of!(SavedRegisters, eip), 48);
        assert_eq!(core::mem::offset_of!(SavedRegisters, ss), 64);
    }

    #[test]
    fn kernel_entry_snapshot() {
        let regs = SavedRegisters::for_entry(
            VirtualAddress::new(0x0010_2000),
            VirtualAddress::new(0x0020_2000),
            Ring::Kernel,
        );
        assert_eq!(regs.eip, 0x0010_2000);
        assert_eq!(regs.esp, 0x0020_2000 - 16);
        assert_eq!(regs.ebp, regs.esp);
        assert_eq!(regs.cs, 0x08);
        assert_eq!([regs.ds, regs.es, regs.fs, regs.gs, regs.ss], [0x10; 5]);
        assert_eq!(regs.eflags, 0x202);
        assert_eq!(regs.useresp, 0);
        assert_eq!(regs.ring(), Ring::Kernel);
        assert_eq!(regs.resume_stack(), 0x0020_2000 - 16);
    }

    #[test]
    fn user_entry_snapshot() {
        let regs = SavedRegisters::for_entry(
            VirtualAddress::new(0x0800_0000),
            VirtualAddress::new(0x0030_0000),
            Ring::User,
        );
        assert_eq!(regs.cs, 0x1B);
        assert_eq!([regs.ds, regs.es, regs.fs, regs.gs, regs.ss], [0x23; 5]);
        assert_eq!(regs.ring(), Ring::User);
        assert_eq!(regs.resume_stack(), 0x0030_0000 - 16);
        assert_eq!([regs.eax, regs.ebx, regs.ecx, regs.edx, regs.esi, regs.edi], [0; 6]);
    }
}
