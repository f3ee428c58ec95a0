//! Simulated physical memory for hosted builds and tests.
//!
//! Physical address `n * 4096 + off` is byte `off` of frame `n` of a
//! heap-allocated, 4 KiB-aligned frame array.

use crate::{FrameAlloc, PhysMapper};
use alloc::collections::BTreeSet;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_memory_addresses::{FRAME_SIZE, PhysicalAddress, PhysicalFrame};

#[repr(C, align(4096))]
struct SimFrame(UnsafeCell<[u8; FRAME_SIZE as usize]>);

/// A zero-initialised array of frames standing in for RAM.
pub struct SimulatedPhysicalMemory {
    frames: Vec<SimFrame>,
}

impl SimulatedPhysicalMemory {
    #[must_use]
    pub fn new(frame_count: usize) -> Self {
        let frames = (0..frame_count)
            .map(|_| SimFrame(UnsafeCell::new([0; FRAME_SIZE as usize])))
            .collect();
        Self { frames }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Total simulated bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.frames.len() as u64 * u64::from(FRAME_SIZE)
    }

    fn bytes(&self, pa: PhysicalAddress, len: usize) -> *mut u8 {
        let frame = &self.frames[pa.frame().index()];
        let off = pa.frame_offset() as usize;
        assert!(off + len <= FRAME_SIZE as usize, "access crosses a frame boundary");
        unsafe { frame.0.get().cast::<u8>().add(off) }
    }

    /// Copy `len` bytes out of one frame.
    ///
    /// # Panics
    /// If the range is outside the simulated memory or crosses a frame.
    #[must_use]
    pub fn read(&self, pa: PhysicalAddress, len: usize) -> Vec<u8> {
        let ptr = self.bytes(pa, len);
        unsafe { core::slice::from_raw_parts(ptr, len) }.to_vec()
    }

    /// Copy `data` into one frame.
    ///
    /// # Panics
    /// If the range is outside the simulated memory or crosses a frame.
    pub fn write(&self, pa: PhysicalAddress, data: &[u8]) {
        let ptr = self.bytes(pa, data.len());
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len()) }
    }

    /// Set every byte of `frame` to `byte`.
    pub fn fill_frame(&self, frame: PhysicalFrame, byte: u8) {
        let ptr = self.bytes(frame.base(), FRAME_SIZE as usize);
        unsafe { core::ptr::write_bytes(ptr, byte, FRAME_SIZE as usize) }
    }
}

impl PhysMapper for SimulatedPhysicalMemory {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let ptr = self.bytes(pa, size_of::<T>());
        unsafe { &mut *ptr.cast::<T>() }
    }
}

/// Frame allocator over a range of frame numbers with a reuse list,
/// outstanding-frame tracking and an optional allocation budget.
///
/// Freeing a frame that is not outstanding panics.
#[derive(Debug)]
pub struct SimFrameAlloc {
    next: u32,
    end: u32,
    reuse: Vec<PhysicalFrame>,
    live: BTreeSet<u32>,
    budget: Option<usize>,
}

impl SimFrameAlloc {
    /// Hand out frame numbers in `first..end`.
    #[must_use]
    pub fn new(first: u32, end: u32) -> Self {
        Self {
            next: first,
            end,
            reuse: Vec::new(),
            live: BTreeSet::new(),
            budget: None,
        }
    }

    /// Allow at most `budget` further allocations (`None` = unlimited).
    pub fn set_budget(&mut self, budget: Option<usize>) {
        self.budget = budget;
    }

    /// Frames currently allocated and not yet freed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_live(&self, frame: PhysicalFrame) -> bool {
        self.live.contains(&frame.number())
    }
}

impl FrameAlloc for SimFrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalFrame> {
        if let Some(budget) = self.budget.as_mut() {
            *budget = budget.checked_sub(1)?;
        }
        let frame = self.reuse.pop().or_else(|| {
            (self.next < self.end).then(|| {
                self.next += 1;
                PhysicalFrame::from_number(self.next - 1)
            })
        })?;
        self.live.insert(frame.number());
        Some(frame)
    }

    fn free_4k(&mut self, frame: PhysicalFrame) {
        assert!(self.live.remove(&frame.number()), "double free of {frame:?}");
        self.reuse.push(frame);
    }
}
