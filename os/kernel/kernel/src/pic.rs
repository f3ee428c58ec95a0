//! # Master 8259 PIC
//!
//! Only what the tick handler needs: acknowledging the timer line. Vector
//! `0x20` is entered both by IRQ 0 and by the `int 0x20` a yielding task
//! raises; only the former may be acknowledged, or the EOI would retire
//! whatever interrupt the PIC has in service instead.
//!
//! The in-service register (ISR) tells the two apart: OCW3 `0x0B` selects
//! it, and bit 0 is set while IRQ 0 awaits its EOI.

/// Master PIC command/status port.
pub const PIC1_COMMAND: u16 = 0x20;

/// OCW3: the next read of the command port returns the ISR.
pub const OCW3_READ_ISR: u8 = 0x0B;

/// Non-specific end-of-interrupt.
pub const PIC_EOI: u8 = 0x20;

const TIMER_IRQ_BIT: u8 = 1 << 0;

/// Byte-wide access to the I/O port space.
pub trait PortIo {
    /// # Safety
    /// Writing `port` must be valid for the device behind it.
    unsafe fn outb(&self, port: u16, value: u8);

    /// # Safety
    /// Reading `port` must be valid for the device behind it.
    unsafe fn inb(&self, port: u16) -> u8;
}

/// Send the EOI for IRQ 0 if the PIC has it in service.
///
/// Returns whether an EOI was sent.
///
/// # Safety
/// `ports` must reach a remapped, initialised master PIC.
pub unsafe fn end_of_timer_interrupt<P: PortIo + ?Sized>(ports: &P) -> bool {
    let isr = unsafe {
        ports.outb(PIC1_COMMAND, OCW3_READ_ISR);
        ports.inb(PIC1_COMMAND)
    };
    if isr & TIMER_IRQ_BIT == 0 {
        return false;
    }
    unsafe { ports.outb(PIC1_COMMAND, PIC_EOI) };
    true
}

/// [`PortIo`] through `in`/`out`.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct X86Ports;

#[cfg(target_arch = "x86")]
impl PortIo for X86Ports {
    #[inline]
    unsafe fn outb(&self, port: u16, value: u8) {
        unsafe {
            core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
        }
    }

    #[inline]
    unsafe fn inb(&self, port: u16) -> u8 {
        let value: u8;
        unsafe {
            core::arch::asm!("in al, dx", in("dx") port, out("al") value, options(nomem, nostack, preserves_flags));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::vec::Vec;

    /// A master PIC whose ISR holds `isr`; records every write.
    struct FakePic {
        isr: u8,
        writes: RefCell<Vec<(u16, u8)>>,
    }

    impl FakePic {
        fn with_isr(isr: u8) -> Self {
            Self {
                isr,
                writes: RefCell::new(Vec::new()),
            }
        }
    }

    impl PortIo for FakePic {
        unsafe fn outb(&self, port: u16, value: u8) {
            self.writes.borrow_mut().push((port, value));
        }

        unsafe fn inb(&self, port: u16) -> u8 {
            assert_eq!(self.writes.borrow().last(), Some(&(port, OCW3_READ_ISR)));
            self.isr
        }
    }

    #[test]
    fn hardware_tick_is_acknowledged() {
        let pic = FakePic::with_isr(0b0000_0001);
        assert!(unsafe { end_of_timer_interrupt(&pic) });
        assert_eq!(
            *pic.writes.borrow(),
            vec![(PIC1_COMMAND, OCW3_READ_ISR), (PIC1_COMMAND, PIC_EOI)]
        );
    }

    #[test]
    fn software_tick_sends_no_eoi() {
        // Keyboard (IRQ 1) in service while a task yields through `int 0x20`.
        let pic = FakePic::with_isr(0b0000_0010);
        assert!(!unsafe { end_of_timer_interrupt(&pic) });
        assert_eq!(*pic.writes.borrow(), vec![(PIC1_COMMAND, OCW3_READ_ISR)]);
    }
}
