//! # Tagged Free-List Heap
//!
//! First-fit, split-on-allocate, coalesce-on-release allocator over one
//! contiguous arena. Every block, free or allocated, starts with a
//! [`BlockHeader`]; blocks tile the arena without gaps:
//!
//! ```text
//! arena start                                                   arena end
//! +--------+-----------+--------+-----------+--------+-------------+
//! | header |  payload  | header |  payload  | header |   payload   |
//! +--------+-----------+--------+-----------+--------+-------------+
//!  ALLOCATED             FREE                 ALLOCATED
//! ```
//!
//! Free blocks additionally form a singly-linked list sorted by address, so
//! a released block finds its neighbours in one pass. The integrity tag in
//! each header catches double frees and corrupted list nodes: such requests
//! are refused rather than allocated over.

use core::fmt;
use core::ptr::{self, NonNull, null_mut};
use log::warn;

/// Tag of a block on the free list.
pub const FREE_TAG: u32 = 0xDEAD_BEEF;

/// Tag of a block handed out to a caller.
pub const ALLOCATED_TAG: u32 = 0xABAD_CAFE;

/// Payload sizes and addresses are multiples of this.
pub const BLOCK_ALIGN: usize = 8;

/// Header stored in front of every block.
///
/// - `size` is the number of payload bytes **after** the header.
/// - `next` links to the next free block; null for allocated blocks.
/// - `tag` is [`FREE_TAG`] or [`ALLOCATED_TAG`].
#[repr(C, align(8))]
struct BlockHeader {
    size: usize,
    next: *mut BlockHeader,
    tag: u32,
}

/// Bytes taken by a block header; a multiple of [`BLOCK_ALIGN`].
pub const HEADER_SIZE: usize = size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE.is_multiple_of(BLOCK_ALIGN));

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("heap arena of {0} bytes cannot hold a single block")]
    ArenaTooSmall(usize),
    #[error("pointer {0:#x} is outside the heap arena")]
    OutOfBounds(usize),
    #[error("pointer {0:#x} is not block aligned")]
    Misaligned(usize),
    #[error("block at {0:#x} is not allocated (double free or foreign pointer)")]
    NotAllocated(usize),
}

/// Allocation state of a block as seen by a heap walk.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BlockState {
    Free,
    Allocated,
    /// The header carries neither tag or its size leaves the arena.
    Corrupt,
}

/// One block reported by [`FreeListHeap::blocks`] or [`FreeListHeap::free_blocks`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BlockInfo {
    /// Address of the header.
    pub header: usize,
    /// Payload bytes.
    pub size: usize,
    pub state: BlockState,
}

impl BlockInfo {
    /// Address handed to the caller for this block.
    #[must_use]
    pub const fn payload(&self) -> usize {
        self.header + HEADER_SIZE
    }
}

/// Aggregate view of the arena.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct HeapStats {
    pub arena_size: usize,
    pub free_bytes: usize,
    pub used_bytes: usize,
    pub free_blocks: usize,
    pub allocated_blocks: usize,
    pub largest_free: usize,
}

/// The heap allocator state.
///
/// # Invariants
/// - Blocks tile `[start, start + size)` exactly: the sum of `HEADER_SIZE +
///   size` over all blocks equals the arena size.
/// - Every block on the free list is tagged [`FREE_TAG`]; the list is sorted
///   by address.
pub struct FreeListHeap {
    /// First free block, or null.
    head: *mut BlockHeader,
    /// Arena base (8-aligned), null before [`init`](Self::init).
    start: *mut u8,
    /// Arena length after alignment trimming.
    size: usize,
}

// Safety: the heap is only reached through a lock; raw pointers never escape.
unsafe impl Send for FreeListHeap {}

impl Default for FreeListHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeListHeap {
    /// An empty heap; every allocation fails until [`init`](Self::init).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            head: null_mut(),
            start: null_mut(),
            size: 0,
        }
    }

    /// Manage the region `[start, start + size)` as one free block.
    ///
    /// The start is rounded up and the length down to [`BLOCK_ALIGN`].
    ///
    /// # Errors
    /// [`HeapError::ArenaTooSmall`] if the region cannot hold a header and
    /// one aligned payload unit.
    ///
    /// # Safety
    /// - The region must be valid for reads and writes and exclusively owned
    ///   by this heap for as long as it is used.
    /// - Must not be called again while allocations are outstanding.
    pub unsafe fn init(&mut self, start: *mut u8, size: usize) -> Result<(), HeapError> {
        let pad = start.align_offset(BLOCK_ALIGN);
        let usable = size.saturating_sub(pad) & !(BLOCK_ALIGN - 1);
        if usable < HEADER_SIZE + BLOCK_ALIGN {
            return Err(HeapError::ArenaTooSmall(size));
        }

        let start = unsafe { start.add(pad) };
        let head = start.cast::<BlockHeader>();
        unsafe {
            head.write(BlockHeader {
                size: usable - HEADER_SIZE,
                next: null_mut(),
                tag: FREE_TAG,
            });
        }
        self.start = start;
        self.size = usable;
        self.head = head;
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        !self.start.is_null()
    }

    /// Base address of the managed arena.
    #[must_use]
    pub fn arena_start(&self) -> usize {
        self.start as usize
    }

    /// Length of the managed arena in bytes.
    #[must_use]
    pub const fn arena_size(&self) -> usize {
        self.size
    }

    /// Allocate `size` bytes, 8-aligned.
    ///
    /// Returns `None` for zero-sized requests, when no free block is large
    /// enough, or when the free list is found to be corrupted.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let size = size.checked_next_multiple_of(BLOCK_ALIGN)?;

        let mut prev: *mut BlockHeader = null_mut();
        let mut curr = self.head;

        // Safety: every node reached from `head` lies inside the arena as long
        // as the tags check out; a bad tag stops the walk.
        unsafe {
            while !curr.is_null() {
                if (*curr).tag != FREE_TAG {
                    warn!("heap: free list corrupted at {:#x}", curr as usize);
                    return None;
                }

                if (*curr).size >= size {
                    if (*curr).size > size.saturating_add(HEADER_SIZE + BLOCK_ALIGN) {
                        let split = curr.byte_add(HEADER_SIZE + size);
                        split.write(BlockHeader {
                            size: (*curr).size - size - HEADER_SIZE,
                            next: (*curr).next,
                            tag: FREE_TAG,
                        });
                        (*curr).size = size;
                        (*curr).next = split;
                    }

                    if prev.is_null() {
                        self.head = (*curr).next;
                    } else {
                        (*prev).next = (*curr).next;
                    }
                    (*curr).next = null_mut();
                    (*curr).tag = ALLOCATED_TAG;
                    return NonNull::new(curr.byte_add(HEADER_SIZE).cast::<u8>());
                }

                prev = curr;
                curr = (*curr).next;
            }
        }
        None
    }

    /// Validate `ptr` and return its header if it heads an allocated block.
    fn allocated_header(&self, ptr: NonNull<u8>) -> Result<*mut BlockHeader, HeapError> {
        let addr = ptr.as_ptr() as usize;
        let start = self.start as usize;
        if self.start.is_null() || addr < start + HEADER_SIZE || addr >= start + self.size {
            return Err(HeapError::OutOfBounds(addr));
        }
        if (addr - start) % BLOCK_ALIGN != 0 {
            return Err(HeapError::Misaligned(addr));
        }

        // Derive from the arena base to keep provenance within the arena.
        let header = unsafe { self.start.add(addr - start - HEADER_SIZE) }.cast::<BlockHeader>();
        if unsafe { (*header).tag } != ALLOCATED_TAG {
            return Err(HeapError::NotAllocated(addr));
        }
        Ok(header)
    }

    /// Return a block to the free list and merge it with adjacent free
    /// neighbours.
    ///
    /// Pointers that are outside the arena, misaligned or not currently
    /// allocated are refused and leave the heap unchanged.
    ///
    /// # Errors
    /// See [`HeapError`]; every error means nothing was modified.
    ///
    /// # Safety
    /// `ptr` must have been returned by [`allocate`](Self::allocate) or
    /// [`reallocate`](Self::reallocate) on this heap and must not be used
    /// after a successful release.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let header = self.allocated_header(ptr)?;

        unsafe {
            (*header).tag = FREE_TAG;

            // Address-ordered insert.
            let mut prev: *mut BlockHeader = null_mut();
            let mut curr = self.head;
            while !curr.is_null() && curr < header {
                prev = curr;
                curr = (*curr).next;
            }
            (*header).next = curr;
            if prev.is_null() {
                self.head = header;
            } else {
                (*prev).next = header;
            }

            // Merge with the successor, then with the predecessor.
            if !curr.is_null() && header.byte_add(HEADER_SIZE + (*header).size) == curr {
                (*header).size += HEADER_SIZE + (*curr).size;
                (*header).next = (*curr).next;
            }
            if !prev.is_null() && prev.byte_add(HEADER_SIZE + (*prev).size) == header {
                (*prev).size += HEADER_SIZE + (*header).size;
                (*prev).next = (*header).next;
            }
        }
        Ok(())
    }

    /// Payload capacity of an allocated block.
    ///
    /// # Errors
    /// Same validation as [`release`](Self::release).
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        let header = self.allocated_header(ptr)?;
        Ok(unsafe { (*header).size })
    }

    /// Resize an allocation.
    ///
    /// - `None` behaves like [`allocate`](Self::allocate).
    /// - `new_size == 0` releases `ptr` and returns `None`.
    /// - If the block already holds `new_size` bytes, `ptr` is returned as is.
    /// - Otherwise the contents move to a new block. If that allocation
    ///   fails, `None` is returned and `ptr` stays valid.
    ///
    /// # Safety
    /// Same contract as [`release`](Self::release) for `ptr`.
    pub unsafe fn reallocate(
        &mut self,
        ptr: Option<NonNull<u8>>,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        let Some(ptr) = ptr else {
            return self.allocate(new_size);
        };
        if new_size == 0 {
            if let Err(e) = unsafe { self.release(ptr) } {
                warn!("heap: reallocation to zero bytes left {:p} alone: {e}", ptr.as_ptr());
            }
            return None;
        }

        let old_size = match self.usable_size(ptr) {
            Ok(size) => size,
            Err(e) => {
                warn!("heap: refusing reallocation: {e}");
                return None;
            }
        };
        if old_size >= new_size {
            return Some(ptr);
        }

        let new = self.allocate(new_size)?;
        unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), new.as_ptr(), old_size) };
        if let Err(e) = unsafe { self.release(ptr) } {
            warn!("heap: old block {:p} not released after move: {e}", ptr.as_ptr());
        }
        Some(new)
    }

    /// Walk every block in address order.
    #[must_use]
    pub const fn blocks(&self) -> Blocks<'_> {
        Blocks {
            heap: self,
            offset: 0,
        }
    }

    /// Walk the free list.
    #[must_use]
    pub const fn free_blocks(&self) -> FreeBlocks<'_> {
        FreeBlocks {
            heap: self,
            curr: self.head,
        }
    }

    /// Summarise the arena by walking all blocks.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            arena_size: self.size,
            ..HeapStats::default()
        };
        for block in self.blocks() {
            match block.state {
                BlockState::Free => {
                    stats.free_blocks += 1;
                    stats.free_bytes += block.size;
                    stats.largest_free = stats.largest_free.max(block.size);
                }
                BlockState::Allocated => {
                    stats.allocated_blocks += 1;
                    stats.used_bytes += block.size;
                }
                BlockState::Corrupt => break,
            }
        }
        stats
    }
}

impl fmt::Debug for FreeListHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeListHeap")
            .field("start", &self.start)
            .field("size", &self.size)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Iterator over all blocks by address; stops after a corrupt header.
pub struct Blocks<'a> {
    heap: &'a FreeListHeap,
    offset: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let heap = self.heap;
        if heap.start.is_null() || self.offset + HEADER_SIZE > heap.size {
            return None;
        }

        let header = unsafe { heap.start.add(self.offset) }.cast::<BlockHeader>();
        let (size, tag) = unsafe { ((*header).size, (*header).tag) };
        let addr = header as usize;

        let fits = size <= heap.size - self.offset - HEADER_SIZE;
        let state = match tag {
            FREE_TAG if fits => BlockState::Free,
            ALLOCATED_TAG if fits => BlockState::Allocated,
            _ => BlockState::Corrupt,
        };

        self.offset = if state == BlockState::Corrupt {
            heap.size
        } else {
            self.offset + HEADER_SIZE + size
        };
        Some(BlockInfo {
            header: addr,
            size,
            state,
        })
    }
}

/// Iterator over the free list; stops at the first block not tagged free.
pub struct FreeBlocks<'a> {
    heap: &'a FreeListHeap,
    curr: *mut BlockHeader,
}

impl Iterator for FreeBlocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr.is_null() {
            return None;
        }
        let node = self.curr;
        let (size, next, tag) = unsafe { ((*node).size, (*node).next, (*node).tag) };
        if tag != FREE_TAG {
            self.curr = null_mut();
            return Some(BlockInfo {
                header: node as usize,
                size,
                state: BlockState::Corrupt,
            });
        }
        debug_assert!(node as usize >= self.heap.arena_start());
        self.curr = next;
        Some(BlockInfo {
            header: node as usize,
            size,
            state: BlockState::Free,
        })
    }
}
