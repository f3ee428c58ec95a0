//! Task control blocks.

use crate::arena::Handle;
use crate::registers::{Ring, SavedRegisters};
use alloc::string::String;
use core::fmt;
use kernel_info::memory::direct_map;
use kernel_info::sched::{DEFAULT_PRIORITY, MAX_NAME_LEN};
use kernel_memory_addresses::{FRAME_SIZE, PhysicalFrame, VirtualAddress};
use kernel_vmem::FrameAlloc;

/// Monotonic task identifier; the idle task is `1`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(pub u32);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TaskState {
    Running,
    Ready,
    Blocked,
    Zombie,
}

/// Parameters of a task to be created.
#[derive(Debug, Copy, Clone)]
pub struct TaskParams<'n> {
    pub entry: VirtualAddress,
    pub priority: u32,
    pub ring: Ring,
    pub name: &'n str,
}

impl<'n> TaskParams<'n> {
    /// A ring 0 task at default priority named `"unnamed"`.
    #[must_use]
    pub const fn new(entry: VirtualAddress) -> Self {
        Self {
            entry,
            priority: DEFAULT_PRIORITY,
            ring: Ring::Kernel,
            name: "unnamed",
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_ring(mut self, ring: Ring) -> Self {
        self.ring = ring;
        self
    }

    #[must_use]
    pub const fn with_name(mut self, name: &'n str) -> Self {
        self.name = name;
        self
    }
}

/// Physically contiguous frames backing one stack.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Stack {
    pub(crate) base: PhysicalFrame,
    pub(crate) frames: u32,
}

impl Stack {
    /// One past the highest stack byte; stacks grow down from here.
    ///
    /// Stack frames may lie anywhere in RAM, so the stack is addressed
    /// through the direct map, which every address space shares.
    #[must_use]
    pub fn top(&self) -> VirtualAddress {
        let end = self.base.base() + self.frames * FRAME_SIZE;
        direct_map(end)
    }

    #[must_use]
    pub const fn frames(&self) -> u32 {
        self.frames
    }

    pub(crate) fn release<A: FrameAlloc + ?Sized>(self, alloc: &mut A) {
        let mut frame = self.base;
        for _ in 0..self.frames {
            alloc.free_4k(frame);
            frame = frame.next();
        }
    }
}

/// Task control block.
pub struct Tcb {
    pub(crate) id: TaskId,
    pub(crate) regs: SavedRegisters,
    pub(crate) state: TaskState,
    pub(crate) priority: u32,
    pub(crate) time_slice: u32,
    pub(crate) cpu_ticks: u64,
    pub(crate) ring: Ring,
    pub(crate) name: String,
    /// Successor in the ready ring. Kept after unlinking so a task that just
    /// left the ring still knows where to continue.
    pub(crate) next: Option<Handle>,
    /// `None` for the idle task, which runs on the boot stack.
    pub(crate) stack: Option<Stack>,
    /// Privilege-transition stack of a ring 3 task.
    pub(crate) kernel_stack: Option<Stack>,
}

impl Tcb {
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    #[must_use]
    pub const fn priority(&self) -> u32 {
        self.priority
    }

    /// Ticks left in the current budget.
    #[must_use]
    pub const fn time_slice(&self) -> u32 {
        self.time_slice
    }

    /// Ticks spent running.
    #[must_use]
    pub const fn cpu_ticks(&self) -> u64 {
        self.cpu_ticks
    }

    #[must_use]
    pub const fn ring(&self) -> Ring {
        self.ring
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn regs(&self) -> &SavedRegisters {
        &self.regs
    }

    /// Top of the stack used in ring 0: the task stack for kernel tasks,
    /// the dedicated transition stack for user tasks.
    #[must_use]
    pub fn kernel_stack(&self) -> Option<VirtualAddress> {
        match self.ring {
            Ring::Kernel => self.stack.map(|s| s.top()),
            Ring::User => self.kernel_stack.map(|s| s.top()),
        }
    }

    /// Top of the user stack; `None` for kernel tasks.
    #[must_use]
    pub fn user_stack(&self) -> Option<VirtualAddress> {
        match self.ring {
            Ring::Kernel => None,
            Ring::User => self.stack.map(|s| s.top()),
        }
    }

    /// Number of frames owned by this task.
    #[must_use]
    pub fn owned_frames(&self) -> u32 {
        self.stack.map_or(0, |s| s.frames) + self.kernel_stack.map_or(0, |s| s.frames)
    }

    pub(crate) fn release_stacks<A: FrameAlloc + ?Sized>(&mut self, alloc: &mut A) {
        if let Some(stack) = self.stack.take() {
            stack.release(alloc);
        }
        if let Some(stack) = self.kernel_stack.take() {
            stack.release(alloc);
        }
    }

    /// Snapshot for listings.
    #[must_use]
    pub fn info(&self) -> TaskInfo<'_> {
        TaskInfo {
            id: self.id,
            name: &self.name,
            state: self.state,
            priority: self.priority,
            cpu_ticks: self.cpu_ticks,
        }
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("ring", &self.ring)
            .finish_non_exhaustive()
    }
}

/// One row of a task listing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TaskInfo<'a> {
    pub id: TaskId,
    pub name: &'a str,
    pub state: TaskState,
    pub priority: u32,
    pub cpu_ticks: u64,
}

/// Copy `name` into a fresh string, cut to [`MAX_NAME_LEN`] bytes on a
/// character boundary. `None` if the heap is exhausted.
pub(crate) fn bounded_name(name: &str) -> Option<String> {
    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::new();
    out.try_reserve_exact(end).ok()?;
    out.push_str(&name[..end]);
    Some(out)
}
