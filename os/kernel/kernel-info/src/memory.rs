//! # Memory Layout

pub use kernel_memory_addresses::{ENTRIES_PER_TABLE, FRAME_SIZE, TABLE_SPAN};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Physical (and identity-mapped virtual) load address of the kernel image.
pub const KERNEL_PHYS_START: u32 = 0x0010_0000; // 1 MiB

/// Number of page tables identity mapped at boot.
pub const IDENTITY_MAPPED_TABLES: usize = 2;

/// Bytes covered by the boot identity map.
pub const IDENTITY_MAP_SIZE: u32 = TABLE_SPAN * IDENTITY_MAPPED_TABLES as u32; // 8 MiB

/// Virtual base of the direct map: physical address `pa` is reachable at
/// `DIRECT_MAP_BASE + pa` in every address space.
pub const DIRECT_MAP_BASE: u32 = 0xC000_0000;

/// Largest amount of physical memory the direct map covers. Frames above it
/// are never handed out.
pub const DIRECT_MAP_SIZE: u32 = 0x4000_0000; // 1 GiB

/// Frames covered by the direct map.
pub const DIRECT_MAP_FRAMES: u32 = DIRECT_MAP_SIZE / FRAME_SIZE;

/// Where `pa` appears in the direct map. `pa` must lie below [`DIRECT_MAP_SIZE`].
#[inline]
#[must_use]
pub const fn direct_map(pa: PhysicalAddress) -> VirtualAddress {
    VirtualAddress::new(DIRECT_MAP_BASE.wrapping_add(pa.as_u32()))
}

/// Base of the kernel heap arena.
pub const HEAP_START: u32 = 0x0040_0000; // 4 MiB

/// Size of the kernel heap arena.
pub const HEAP_SIZE: u32 = 0x0010_0000; // 1 MiB

/// Gap left between the stack top and the initial stack pointer of a new task.
pub const STACK_SAFETY_MARGIN: u32 = 16;

/// Frames per task stack when a contiguous second frame is available.
pub const MAX_STACK_FRAMES: usize = 2;

const _: () = {
    assert!(IDENTITY_MAP_SIZE == 0x0080_0000);
    assert!(HEAP_START.is_multiple_of(FRAME_SIZE));
    assert!(HEAP_SIZE.is_multiple_of(FRAME_SIZE));
    assert!(HEAP_START > KERNEL_PHYS_START);
    assert!(HEAP_START + HEAP_SIZE <= IDENTITY_MAP_SIZE);
    assert!(IDENTITY_MAP_SIZE <= DIRECT_MAP_BASE);
    assert!(DIRECT_MAP_BASE.is_multiple_of(TABLE_SPAN));
    assert!(DIRECT_MAP_BASE as u64 + DIRECT_MAP_SIZE as u64 <= 1 << 32);
};
