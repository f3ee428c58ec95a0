//! # Kernel Entry Point
//!
//! A Multiboot2 loader jumps to `_start` in protected mode with paging off,
//! `EAX` holding the loader magic and `EBX` the information block. The stub
//! switches to the boot stack and calls [`kernel::x86::kernel_main`].

#![cfg_attr(target_os = "none", no_std, no_main)]
#![allow(unsafe_code)]

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod entry {
    use kernel_info::boot::MULTIBOOT2_HEADER_MAGIC;

    /// Boot stack size; the idle task keeps running on it.
    const BOOT_STACK_SIZE: usize = 16 * 1024;

    #[repr(C, align(8))]
    struct Multiboot2Header {
        magic: u32,
        architecture: u32,
        header_length: u32,
        checksum: u32,
        end_tag_type: u16,
        end_tag_flags: u16,
        end_tag_size: u32,
    }

    #[allow(clippy::cast_possible_truncation)]
    const HEADER_LENGTH: u32 = size_of::<Multiboot2Header>() as u32;

    #[unsafe(link_section = ".multiboot2")]
    #[used]
    static MULTIBOOT2_HEADER: Multiboot2Header = Multiboot2Header {
        magic: MULTIBOOT2_HEADER_MAGIC,
        architecture: 0,
        header_length: HEADER_LENGTH,
        checksum: 0u32
            .wrapping_sub(MULTIBOOT2_HEADER_MAGIC)
            .wrapping_sub(HEADER_LENGTH),
        end_tag_type: 0,
        end_tag_flags: 0,
        end_tag_size: 8,
    };

    #[repr(align(16))]
    struct Aligned<const N: usize>([u8; N]);

    #[unsafe(link_section = ".bss.boot")]
    static mut BOOT_STACK: Aligned<BOOT_STACK_SIZE> = Aligned([0; BOOT_STACK_SIZE]);

    #[unsafe(no_mangle)]
    #[unsafe(naked)]
    pub unsafe extern "C" fn _start() -> ! {
        core::arch::naked_asm!(
            "cli",
            "lea esp, [{stack} + {stack_size}]",
            "xor ebp, ebp",
            // kernel_main(magic, info)
            "push ebx",
            "push eax",
            "call {main}",
            "2:",
            "hlt",
            "jmp 2b",
            stack = sym BOOT_STACK,
            stack_size = const BOOT_STACK_SIZE,
            main = sym kernel::x86::kernel_main,
        )
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("the kernel only runs on a bare-metal i386 target");
}
