//! # Kernel synchronization primitives
//!
//! The kernel runs on a single core; the only source of concurrency is the
//! timer interrupt. Shared state is therefore protected by masking
//! interrupts ([`IrqGuard`]), optionally combined with a [`SpinLock`] so the
//! same structures stay sound when exercised from several host threads in
//! tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

#[cfg(target_arch = "x86")]
pub use irq::Cpu;
pub use irq::{InterruptControl, IrqGuard, SimulatedInterrupts, without_interrupts};
pub use spin_lock::{IrqSpinLockGuard, SpinLock, SpinLockGuard};
