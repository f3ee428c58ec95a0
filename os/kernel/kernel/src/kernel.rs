//! # Kernel State
//!
//! One [`Kernel`] value holds the frame bitmap, the virtual memory manager,
//! the scheduler and the process table. It is created by [`Kernel::boot`]
//! and from then on reached only through `&mut self`; on bare metal a single
//! instance sits behind a spin lock.

use crate::heap::KernelHeap;
use crate::platform::Platform;
use core::ops::Range;
use kernel_alloc::{BitmapFrameAlloc, FrameAllocError, HeapError, Vmm, VmmError};
use kernel_info::boot::MemoryRegion;
use kernel_info::config::KernelConfig;
use kernel_info::memory::{DIRECT_MAP_FRAMES, DIRECT_MAP_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_sync::{InterruptControl, IrqGuard};
use kernel_task::{
    Process, ProcessError, ProcessId, ProcessTable, SavedRegisters, Scheduler, SchedulerStats,
    TaskError, TaskId, TaskInfo, TaskParams, Tcb,
};
use kernel_vmem::PhysMapper;
use log::{info, trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootError {
    #[error("frame allocator: {0}")]
    Frames(#[from] FrameAllocError),
    #[error("virtual memory: {0}")]
    Vmm(#[from] VmmError),
    #[error("heap: {0}")]
    Heap(#[from] HeapError),
    #[error("scheduler: {0}")]
    Scheduler(#[from] TaskError),
    #[error("heap arena {start:#x}+{size:#x} is outside the identity map")]
    HeapNotMapped { start: u32, size: u32 },
}

/// Memory the heap is built on.
#[derive(Debug, Copy, Clone)]
pub struct HeapArena {
    pub start: *mut u8,
    pub size: usize,
}

/// Everything the boot path hands over besides the hardware.
///
/// Only the bitmap outlives the boot; the memory map may be temporary.
pub struct BootParams<'a, 'b> {
    /// Physical memory map as reported by the boot loader.
    pub regions: &'a [MemoryRegion],
    /// Ranges that must never be handed out (kernel image, heap arena).
    pub reserved: &'a [Range<PhysicalAddress>],
    /// Storage for the frame bitmap, at least
    /// [`BitmapFrameAlloc::words_for`] words long.
    pub bitmap: &'b mut [u32],
    pub heap: HeapArena,
}

pub struct Kernel<'b, P: Platform, M: PhysMapper> {
    platform: P,
    config: KernelConfig,
    frames: BitmapFrameAlloc<'b>,
    vmm: Vmm<M>,
    scheduler: Scheduler,
    processes: ProcessTable,
}

impl<'b, P: Platform, M: PhysMapper> Kernel<'b, P, M> {
    /// Bring the kernel up: frame allocator, identity and direct maps with
    /// paging, heap, then the scheduler with the calling context as its
    /// idle task.
    ///
    /// Every frame the allocator can hand out is covered by the direct map;
    /// RAM beyond it is withheld.
    ///
    /// The configured heap placement must fall inside the identity map; the
    /// arena itself is passed in `params.heap`.
    ///
    /// # Errors
    /// The first subsystem that fails to initialize, wrapped in
    /// [`BootError`]. A failed boot is not rolled back.
    ///
    /// # Safety
    /// - Runs once, at CPL0, with interrupts masked.
    /// - The identity map must cover the running kernel and its boot stack.
    /// - `mapper` must reach physical memory through the direct map once
    ///   paging is on.
    /// - `params.heap` must be exclusively owned memory inside the identity
    ///   map, and `heap` must not be in use yet.
    pub unsafe fn boot<I: InterruptControl>(
        mut platform: P,
        mapper: M,
        config: KernelConfig,
        params: BootParams<'_, 'b>,
        heap: &KernelHeap<I>,
    ) -> Result<Self, BootError> {
        let heap_end = u64::from(config.heap_start) + u64::from(config.heap_size);
        if heap_end > config.identity_map_size() {
            return Err(BootError::HeapNotMapped {
                start: config.heap_start,
                size: config.heap_size,
            });
        }

        let mut frames = BitmapFrameAlloc::init(params.bitmap, params.regions, params.reserved)?;
        if frames.total_frames() > DIRECT_MAP_FRAMES {
            let withheld = frames.reserve_range(
                PhysicalAddress::new(DIRECT_MAP_SIZE)..PhysicalAddress::new(u32::MAX),
            );
            warn!("kernel: {withheld} frames above the direct map are left unused");
        }

        let direct_frames = frames.total_frames().min(DIRECT_MAP_FRAMES);
        let (_, paging) = platform.parts();
        let vmm = unsafe {
            Vmm::init(
                mapper,
                &mut frames,
                paging,
                config.identity_mapped_tables,
                direct_frames,
            )?
        };

        unsafe { heap.init(params.heap.start, params.heap.size)? };

        let mut scheduler = Scheduler::new(config.tick_period_ms());
        scheduler.init(config.idle_task_name)?;

        info!(
            "kernel: boot complete, {} of {} frames free, tick every {} ms",
            frames.free_frames(),
            frames.total_frames(),
            config.tick_period_ms()
        );

        Ok(Self {
            platform,
            config,
            frames,
            vmm,
            scheduler,
            processes: ProcessTable::new(),
        })
    }

    /// Timer interrupt entry point.
    ///
    /// `frame` holds the interrupted task's registers on entry and the
    /// registers of the task to resume on return. Zombies are reaped first,
    /// while execution is guaranteed to be off their stacks.
    pub fn timer_tick(&mut self, frame: &mut SavedRegisters) {
        let reaped = self.scheduler.reap_zombies(&mut self.frames);
        if reaped > 0 {
            trace!("kernel: reaped {reaped} tasks");
        }
        self.scheduler.schedule(frame);
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    #[must_use]
    pub const fn vmm(&self) -> &Vmm<M> {
        &self.vmm
    }

    #[must_use]
    pub const fn frames(&self) -> &BitmapFrameAlloc<'b> {
        &self.frames
    }

    /// Claim one physical frame; `None` when memory is exhausted.
    pub fn allocate_frame(&mut self) -> Option<PhysicalFrame> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        self.frames.allocate_frame()
    }

    /// Return a frame. A frame that is already free is reported and left alone.
    ///
    /// # Errors
    /// See [`BitmapFrameAlloc::free_frame`].
    pub fn free_frame(&mut self, frame: PhysicalFrame) -> Result<(), FrameAllocError> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        let result = self.frames.free_frame(frame);
        if let Err(e) = result {
            warn!("kernel: {e}");
        }
        result
    }

    /// Map `va` to `frame` in the kernel address space.
    ///
    /// # Errors
    /// See [`Vmm::map_page`].
    pub fn map_page(&mut self, va: VirtualAddress, frame: PhysicalFrame) -> Result<(), VmmError> {
        let (irq, paging) = self.platform.parts();
        let _irq = IrqGuard::new(irq);
        self.vmm.map_page(&mut self.frames, paging, va, frame)
    }

    /// Remove a kernel mapping; the frame stays allocated.
    ///
    /// # Errors
    /// See [`Vmm::unmap_page`].
    pub fn unmap_page(&mut self, va: VirtualAddress) -> Result<PhysicalFrame, VmmError> {
        let (irq, paging) = self.platform.parts();
        let _irq = IrqGuard::new(irq);
        self.vmm.unmap_page(paging, va)
    }

    /// Create a task and append it to the ready ring.
    ///
    /// # Errors
    /// See [`Scheduler::create_task`]; nothing is allocated on failure.
    pub fn create_task(&mut self, params: TaskParams<'_>) -> Result<TaskId, TaskError> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        self.scheduler.create_task(&mut self.frames, params)
    }

    /// Turn the running task into a zombie. The caller must then force a
    /// tick, after which the task never runs again.
    ///
    /// # Errors
    /// [`TaskError::LastTask`] if no other task could take over; the task
    /// keeps running.
    pub fn exit_current_task(&mut self) -> Result<TaskId, TaskError> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        self.scheduler.exit_current()
    }

    /// # Errors
    /// See [`Scheduler::kill`].
    pub fn kill_task(&mut self, id: TaskId) -> Result<(), TaskError> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        self.scheduler.kill(id)
    }

    /// # Errors
    /// See [`Scheduler::block`].
    pub fn block_task(&mut self, id: TaskId) -> Result<(), TaskError> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        self.scheduler.block(id)
    }

    /// # Errors
    /// See [`Scheduler::unblock`].
    pub fn unblock_task(&mut self, id: TaskId) -> Result<(), TaskError> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        self.scheduler.unblock(id)
    }

    /// # Errors
    /// [`TaskError::NoSuchTask`] if `id` is unknown.
    pub fn set_task_priority(&mut self, id: TaskId, priority: u32) -> Result<(), TaskError> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        self.scheduler.set_priority(id, priority)
    }

    #[must_use]
    pub fn current_task_id(&self) -> Option<TaskId> {
        self.scheduler.current_id()
    }

    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Tcb> {
        self.scheduler.task(id)
    }

    #[must_use]
    pub fn tasks(&self) -> impl Iterator<Item = TaskInfo<'_>> + '_ {
        self.scheduler.tasks()
    }

    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    #[must_use]
    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Ticks to yield for a sleep of `ms` milliseconds.
    #[must_use]
    pub const fn sleep_ticks(&self, ms: u32) -> u32 {
        self.scheduler.sleep_ticks(ms)
    }

    /// Start a process: a private copy of the kernel address space plus a
    /// ring 0 main task at `entry`.
    ///
    /// # Errors
    /// See [`ProcessTable::create_process`]; nothing is allocated on failure.
    pub fn create_process(&mut self, name: &str, entry: VirtualAddress) -> Result<ProcessId, ProcessError> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        self.processes
            .create_process(&mut self.vmm, &mut self.scheduler, &mut self.frames, name, entry)
    }

    /// # Errors
    /// See [`ProcessTable::kill_process`].
    pub fn kill_process(&mut self, pid: ProcessId) -> Result<(), ProcessError> {
        let _irq = IrqGuard::new(self.platform.interrupts());
        self.processes
            .kill_process(pid, &mut self.vmm, &mut self.scheduler, &mut self.frames)
    }

    #[must_use]
    pub fn process(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(pid)
    }

    #[must_use]
    pub fn processes(&self) -> impl Iterator<Item = &Process> + '_ {
        self.processes.iter()
    }

    #[must_use]
    pub const fn current_process(&self) -> Option<ProcessId> {
        self.processes.current()
    }

    /// Load a process's address space.
    ///
    /// # Errors
    /// [`ProcessError::NoSuchProcess`] if `pid` is unknown.
    ///
    /// # Safety
    /// See [`ProcessTable::set_current`].
    pub unsafe fn set_current_process(&mut self, pid: ProcessId) -> Result<(), ProcessError> {
        let (irq, paging) = self.platform.parts();
        unsafe { self.processes.set_current(pid, &mut self.vmm, paging, irq) }
    }

    /// Load the kernel address space again.
    pub fn switch_to_kernel_space(&mut self) {
        let (irq, paging) = self.platform.parts();
        self.processes.switch_to_kernel(&mut self.vmm, paging, irq);
    }
}
