//! # Bare-Metal i386 Glue
//!
//! The single global [`Kernel`], the global allocator, the timer interrupt
//! entry and the task primitives a system-call layer builds on.
//!
//! The descriptor tables, the interrupt controller and the timer belong to
//! the boot stub. It must route vector `0x20` to [`timer_interrupt_entry`]
//! through an interrupt gate before calling [`kernel_main`].
//!
//! ## Timer entry
//!
//! The entry pushes the segment and general purpose registers on top of the
//! processor's interrupt frame, which together form a [`SavedRegisters`].
//! After the tick the registers of the task to resume are copied into a
//! static buffer and restored from there:
//!
//! ```text
//!   ring 0 task:  esp ← saved esp, push eflags, cs, eip          ─┐
//!   ring 3 task:  push ss, useresp, eflags, cs, eip               ├─► restore, iretd
//!                                                                 ─┘
//! ```

use crate::heap::KernelHeap;
use crate::kernel::{BootParams, HeapArena, Kernel};
use crate::pic::{self, X86Ports};
use crate::platform::{Platform, X86Platform};
use core::panic::PanicInfo;
use kernel_alloc::phys_mapper::DirectMapPhysMapper;
use kernel_info::boot::{MULTIBOOT2_BOOTLOADER_MAGIC, MemoryRegion, Multiboot2MemoryMap};
use kernel_info::config::KernelConfig;
use kernel_info::memory::KERNEL_PHYS_START;
use kernel_memory_addresses::PhysicalAddress;
use kernel_qemu::QemuLogger;
use kernel_sync::{Cpu, InterruptControl, SpinLock};
use kernel_task::{Ring, SavedRegisters};
use log::{LevelFilter, error, trace, warn};

type GlobalKernel = Kernel<'static, X86Platform, DirectMapPhysMapper>;

/// Frames tracked at most: 4 GiB.
const BITMAP_WORDS: usize = (1 << 20) / 32;

/// Memory map entries considered.
const MAX_REGIONS: usize = 32;

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Trace);

#[global_allocator]
static HEAP: KernelHeap<Cpu> = KernelHeap::new(Cpu);

static KERNEL: SpinLock<Option<GlobalKernel>> = SpinLock::new(None);

static mut FRAME_BITMAP: [u32; BITMAP_WORDS] = [0; BITMAP_WORDS];

/// Registers of the task the timer entry resumes.
static mut RESUME: SavedRegisters = SavedRegisters::for_ring(Ring::Kernel);

/// Kernel entry, called by the boot stub with the loader's `EAX` and `EBX`.
///
/// Boots the kernel, enables interrupts and becomes the idle task.
///
/// # Safety
/// Called once, at CPL0, with interrupts masked and `info` pointing at the
/// Multiboot2 information block.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn kernel_main(magic: u32, info: *const u8) -> ! {
    let config = KernelConfig::default();
    if LOGGER.install().is_ok() {
        log::set_max_level(config.log_level);
    }

    if magic != MULTIBOOT2_BOOTLOADER_MAGIC {
        error!("kernel: not started by a Multiboot2 loader (magic {magic:#x})");
        halt_forever();
    }

    let total = unsafe { info.cast::<u32>().read_unaligned() } as usize;
    let info = unsafe { core::slice::from_raw_parts(info, total) };
    let mut regions = [MemoryRegion::available(0, 0); MAX_REGIONS];
    let mut count = 0;
    if let Some(map) = Multiboot2MemoryMap::parse(info) {
        for (slot, region) in regions.iter_mut().zip(map) {
            *slot = region;
            count += 1;
        }
    }

    let heap_start = PhysicalAddress::new(config.heap_start);
    let heap_end = PhysicalAddress::new(config.heap_start.saturating_add(config.heap_size));
    let reserved = [
        PhysicalAddress::new(KERNEL_PHYS_START)..heap_start,
        heap_start..heap_end,
    ];
    let params = BootParams {
        regions: &regions[..count],
        reserved: &reserved,
        // Safety: only taken here, once.
        bitmap: unsafe { &mut *(&raw mut FRAME_BITMAP) },
        heap: HeapArena {
            start: core::ptr::with_exposed_provenance_mut(heap_start.as_usize()),
            size: config.heap_size as usize,
        },
    };

    match unsafe { Kernel::boot(X86Platform::new(), DirectMapPhysMapper::new(), config, params, &HEAP) } {
        Ok(kernel) => *KERNEL.lock() = Some(kernel),
        Err(e) => {
            error!("kernel: boot failed: {e}");
            halt_forever();
        }
    }

    let platform = X86Platform::new();
    platform.interrupts().enable();
    loop {
        platform.halt();
    }
}

/// Run `f` on the kernel with interrupts masked. `None` before boot.
///
/// Must not be nested and must not force a tick from inside `f`.
pub fn with_kernel<R>(f: impl FnOnce(&mut GlobalKernel) -> R) -> Option<R> {
    KERNEL.lock_irq(&Cpu).as_mut().map(f)
}

/// Give up the rest of the time slice.
pub fn task_yield() {
    X86Platform::new().raise_timer_interrupt();
}

/// Yield once per elapsed tick of `ms` milliseconds.
pub fn task_sleep(ms: u32) {
    let ticks = with_kernel(|k| k.sleep_ticks(ms)).unwrap_or(0);
    for _ in 0..ticks {
        task_yield();
    }
}

/// Terminate the calling task.
///
/// The last runnable task cannot exit; it idles instead.
pub fn task_exit() -> ! {
    match with_kernel(GlobalKernel::exit_current_task) {
        Some(Ok(_)) => task_yield(),
        Some(Err(e)) => warn!("kernel: task cannot exit: {e}"),
        None => {}
    }
    let platform = X86Platform::new();
    loop {
        platform.halt();
    }
}

/// Vector `0x20` handler, hardware tick and `int 0x20` alike; only a hardware
/// tick is acknowledged at the PIC.
///
/// # Safety
/// Only to be entered through an interrupt gate.
#[unsafe(naked)]
pub unsafe extern "C" fn timer_interrupt_entry() {
    core::arch::naked_asm!(
        "pushad",
        "push ds",
        "push es",
        "push fs",
        "push gs",
        "mov ax, {kernel_data}",
        "mov ds, ax",
        "mov es, ax",
        "cld",

        // esi <- frame to resume
        "push esp",
        "call {handler}",
        "add esp, 4",
        "mov esi, eax",

        "test dword ptr [esi + 52], 3",
        "jnz 2f",

        // Ring 0: continue on the task's own stack.
        "mov esp, [esi + 28]",
        "push dword ptr [esi + 56]",
        "push dword ptr [esi + 52]",
        "push dword ptr [esi + 48]",
        "jmp 3f",

        // Ring 3: full privilege-changing frame on the current kernel stack.
        "2:",
        "push dword ptr [esi + 64]",
        "push dword ptr [esi + 60]",
        "push dword ptr [esi + 56]",
        "push dword ptr [esi + 52]",
        "push dword ptr [esi + 48]",

        "3:",
        "mov eax, [esi + 0]",
        "mov gs, ax",
        "mov eax, [esi + 4]",
        "mov fs, ax",
        "mov eax, [esi + 8]",
        "mov es, ax",
        "mov edi, [esi + 16]",
        "mov ebp, [esi + 24]",
        "mov ebx, [esi + 32]",
        "mov edx, [esi + 36]",
        "mov ecx, [esi + 40]",
        "mov eax, [esi + 12]",
        "push eax",
        "mov eax, [esi + 44]",
        "mov esi, [esi + 20]",
        "pop ds",
        "iretd",

        kernel_data = const kernel_info::cpu::KERNEL_DATA_SELECTOR,
        handler = sym timer_interrupt,
    )
}

extern "C" fn timer_interrupt(frame: &SavedRegisters) -> *const SavedRegisters {
    let mut regs = *frame;
    if matches!(regs.ring(), Ring::Kernel) {
        // pushad stored esp after the processor pushed eip, cs and eflags.
        regs.esp = regs.esp.wrapping_add(12);
    }

    match KERNEL.try_lock() {
        Some(mut kernel) => {
            if let Some(kernel) = kernel.as_mut() {
                kernel.timer_tick(&mut regs);
            }
        }
        None => trace!("kernel: tick skipped, state locked"),
    }

    // A yield through `int 0x20` leaves IRQ 0 out of service.
    unsafe { pic::end_of_timer_interrupt(&X86Ports) };

    let resume = &raw mut RESUME;
    // Safety: interrupts stay masked until the entry has read the buffer.
    unsafe { resume.write(regs) };
    resume
}

fn halt_forever() -> ! {
    let platform = X86Platform::new();
    platform.interrupts().disable();
    loop {
        platform.halt();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    Cpu.disable();
    error!("kernel panic: {info}");
    halt_forever();
}
