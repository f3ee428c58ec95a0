use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Access to the processor's interrupt-enable flag.
///
/// The kernel core never touches `cli`/`sti` directly; it goes through this
/// trait so the interrupt discipline can be exercised on the host with
/// [`SimulatedInterrupts`].
pub trait InterruptControl {
    /// Whether maskable interrupts are currently delivered.
    fn interrupts_enabled(&self) -> bool;

    /// Mask interrupts (`cli`).
    fn disable(&self);

    /// Unmask interrupts (`sti`).
    fn enable(&self);
}

impl<T: InterruptControl + ?Sized> InterruptControl for &T {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        (**self).interrupts_enabled()
    }

    #[inline]
    fn disable(&self) {
        (**self).disable();
    }

    #[inline]
    fn enable(&self) {
        (**self).enable();
    }
}

/// The executing i386 processor.
///
/// # Privilege
///
/// `cli`/`sti` fault outside ring 0 (unless IOPL allows them); only the
/// kernel may use this type.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct Cpu;

#[cfg(target_arch = "x86")]
impl InterruptControl for Cpu {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        use kernel_registers::LoadRegister;
        kernel_registers::eflags::Eflags::load().if_interrupt_enable()
    }

    #[inline]
    fn disable(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    fn enable(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }
}

/// A software interrupt flag for hosted builds.
///
/// Tracks the flag and counts how often interrupts were masked, so callers
/// can assert that a critical section was actually entered.
#[derive(Debug)]
pub struct SimulatedInterrupts {
    enabled: AtomicBool,
    disables: AtomicUsize,
}

impl SimulatedInterrupts {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            disables: AtomicUsize::new(0),
        }
    }

    /// Number of enabled-to-disabled transitions observed.
    #[must_use]
    pub fn disable_count(&self) -> usize {
        self.disables.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedInterrupts {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InterruptControl for SimulatedInterrupts {
    fn interrupts_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn disable(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            self.disables.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt flag. If interrupts were
/// enabled, it masks them. On drop, it unmasks them **only** if they were
/// previously enabled, so guards nest and early returns restore the
/// caller's state.
///
/// # Examples
///
/// ```
/// use kernel_sync::{InterruptControl, IrqGuard, SimulatedInterrupts};
///
/// let irq = SimulatedInterrupts::new(true);
/// {
///     let _g = IrqGuard::new(&irq);
///     assert!(!irq.interrupts_enabled());
/// }
/// assert!(irq.interrupts_enabled());
/// ```
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard<'a, I: InterruptControl + ?Sized> {
    ctl: &'a I,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, I: InterruptControl + ?Sized> IrqGuard<'a, I> {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    pub fn new(ctl: &'a I) -> Self {
        let enabled = ctl.interrupts_enabled();
        if enabled {
            ctl.disable();
        }
        Self {
            ctl,
            were_enabled: enabled,
        }
    }

    /// Whether this guard will re-enable interrupts when dropped.
    #[inline]
    #[must_use]
    pub const fn restores(&self) -> bool {
        self.were_enabled
    }
}

impl<I: InterruptControl + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.ctl.enable();
        }
    }
}

/// Run `f` with interrupts masked, restoring the previous state afterwards.
#[inline]
pub fn without_interrupts<I, R>(ctl: &I, f: impl FnOnce() -> R) -> R
where
    I: InterruptControl + ?Sized,
{
    let _guard = IrqGuard::new(ctl);
    f()
}
