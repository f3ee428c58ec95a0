//! # Typed i386 Control Registers
//!
//! Bitfield models of the registers the paging and interrupt code touch:
//! `CR0` (paging enable), `CR3` (page directory base) and `EFLAGS`
//! (interrupt enable). Raw access is only compiled for 32-bit x86 with the
//! `asm` feature; the bitfields themselves are usable anywhere.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "eflags")]
pub mod eflags;

/// Read a register whose access is privileged or has side effects.
pub trait LoadRegisterUnsafe {
    /// # Safety
    /// Control registers fault outside CPL0.
    unsafe fn load_unsafe() -> Self;
}

/// Write a register back.
pub trait StoreRegisterUnsafe {
    /// # Safety
    /// Requires CPL0. The new value takes effect immediately; writing `CR0`
    /// or `CR3` changes how every following memory access is translated.
    unsafe fn store_unsafe(self);
}

/// Read a register that any ring may inspect, such as `EFLAGS`.
pub trait LoadRegister {
    fn load() -> Self;
}

impl<T: LoadRegister> LoadRegisterUnsafe for T {
    #[inline]
    unsafe fn load_unsafe() -> Self {
        T::load()
    }
}
