//! # Kernel Heap Front-End
//!
//! [`KernelHeap`] puts a [`FreeListHeap`] behind a [`SpinLock`] taken with
//! interrupts masked, and offers it twice:
//!
//! - as the C-style `kmalloc` / `kfree` / `krealloc` trio with null
//!   sentinels, for subsystems that manage raw buffers, and
//! - as a [`GlobalAlloc`], so `alloc` collections work in the kernel.
//!
//! Requests aligned to more than [`BLOCK_ALIGN`] are over-allocated; the
//! distance back to the block start is stored in the word just below the
//! returned pointer.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull, null_mut};
use kernel_alloc::free_list::BLOCK_ALIGN;
use kernel_alloc::{FreeListHeap, HeapError, HeapStats};
use kernel_sync::{InterruptControl, SpinLock};
use log::{info, warn};

const OFFSET_WORD: usize = size_of::<usize>();

pub struct KernelHeap<I: InterruptControl> {
    heap: SpinLock<FreeListHeap>,
    irq: I,
}

impl<I: InterruptControl> KernelHeap<I> {
    /// An uninitialized heap; every allocation returns null until
    /// [`init`](Self::init).
    #[must_use]
    pub const fn new(irq: I) -> Self {
        Self {
            heap: SpinLock::new(FreeListHeap::new()),
            irq,
        }
    }

    /// Hand the arena `[start, start + size)` to the heap.
    ///
    /// # Errors
    /// [`HeapError::ArenaTooSmall`] if the arena cannot hold a single block.
    ///
    /// # Safety
    /// See [`FreeListHeap::init`]. The arena must stay mapped and unused by
    /// anything else for the lifetime of the heap.
    pub unsafe fn init(&self, start: *mut u8, size: usize) -> Result<(), HeapError> {
        let mut heap = self.heap.lock_irq(&self.irq);
        unsafe { heap.init(start, size)? };
        info!("heap: {} KiB arena at {start:p}", heap.arena_size() / 1024);
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.heap.lock_irq(&self.irq).is_initialized()
    }

    /// Allocate `size` bytes aligned to 8.
    ///
    /// Returns null for `size == 0` and when no free block fits.
    #[must_use]
    pub fn kmalloc(&self, size: usize) -> *mut u8 {
        self.heap
            .lock_irq(&self.irq)
            .allocate(size)
            .map_or(null_mut(), NonNull::as_ptr)
    }

    /// Return a block to the heap. Null is ignored, and so is a pointer the
    /// heap does not recognise as allocated (logged as a warning).
    ///
    /// # Safety
    /// A non-null `ptr` must come from [`kmalloc`](Self::kmalloc) or
    /// [`krealloc`](Self::krealloc) on this heap and is dangling afterwards.
    pub unsafe fn kfree(&self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        let released = unsafe { self.heap.lock_irq(&self.irq).release(ptr) };
        if let Err(e) = released {
            warn!("kfree: {:p} ignored: {e}", ptr.as_ptr());
        }
    }

    /// Resize a block, moving its contents if needed.
    ///
    /// Null `ptr` allocates, `size == 0` frees and returns null. On failure
    /// null is returned and the old block stays valid.
    ///
    /// # Safety
    /// Same contract as [`kfree`](Self::kfree) for `ptr`.
    pub unsafe fn krealloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        unsafe { self.heap.lock_irq(&self.irq).reallocate(NonNull::new(ptr), size) }
            .map_or(null_mut(), NonNull::as_ptr)
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.heap.lock_irq(&self.irq).stats()
    }

    /// Run `f` on the locked heap, e.g. to walk its blocks.
    pub fn with_heap<R>(&self, f: impl FnOnce(&FreeListHeap) -> R) -> R {
        f(&self.heap.lock_irq(&self.irq))
    }
}

unsafe impl<I: InterruptControl> GlobalAlloc for KernelHeap<I> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() <= BLOCK_ALIGN {
            return self.kmalloc(layout.size());
        }

        let Some(padded) = layout.size().checked_add(layout.align()) else {
            return null_mut();
        };
        let raw = self.kmalloc(padded);
        if raw.is_null() {
            return raw;
        }

        // `raw` is 8-aligned, so the offset never exceeds `layout.align()`.
        let offset = (raw as usize + OFFSET_WORD).next_multiple_of(layout.align()) - raw as usize;
        unsafe {
            let aligned = raw.add(offset);
            aligned.sub(OFFSET_WORD).cast::<usize>().write(offset);
            aligned
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.align() <= BLOCK_ALIGN {
            unsafe { self.kfree(ptr) };
        } else {
            unsafe {
                let offset = ptr.sub(OFFSET_WORD).cast::<usize>().read();
                self.kfree(ptr.sub(offset));
            }
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() <= BLOCK_ALIGN {
            return unsafe { self.krealloc(ptr, new_size) };
        }

        let Ok(new_layout) = Layout::from_size_align(new_size, layout.align()) else {
            return null_mut();
        };
        unsafe {
            let new = self.alloc(new_layout);
            if !new.is_null() {
                ptr::copy_nonoverlapping(ptr, new, layout.size().min(new_size));
                self.dealloc(ptr, layout);
            }
            new
        }
    }
}
