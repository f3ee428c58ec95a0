use core::ops::Range;
use kernel::{BootError, BootParams, HeapArena, Kernel, KernelHeap, Platform};
use kernel_alloc::{FrameAllocError, VmmError};
use kernel_info::boot::MemoryRegion;
use kernel_info::config::KernelConfig;
use kernel_info::memory::{DIRECT_MAP_BASE, direct_map};
use kernel_memory_addresses::{PhysicalAddress, PhysicalFrame, VirtualAddress};
use kernel_sync::{InterruptControl, SimulatedInterrupts};
use kernel_task::{ProcessError, Ring, SavedRegisters, TaskError, TaskParams, TaskState};
use kernel_vmem::PagingControl;
use kernel_vmem::sim::SimulatedPhysicalMemory;

const FRAMES: usize = 4096;
const IDLE_EIP: u32 = 0x0010_2000;

#[derive(Default)]
struct RecordingPaging {
    loads: Vec<PhysicalAddress>,
    enabled: bool,
    invalidated: Vec<VirtualAddress>,
}

impl PagingControl for RecordingPaging {
    unsafe fn load_directory(&mut self, directory: PhysicalAddress) {
        self.loads.push(directory);
    }

    unsafe fn enable_paging(&mut self) {
        self.enabled = true;
    }

    fn invalidate_page(&mut self, va: VirtualAddress) {
        self.invalidated.push(va);
    }
}

#[derive(Default)]
struct SimPlatform {
    irq: SimulatedInterrupts,
    paging: RecordingPaging,
}

impl Platform for SimPlatform {
    type Interrupts = SimulatedInterrupts;
    type Paging = RecordingPaging;

    fn interrupts(&self) -> &SimulatedInterrupts {
        &self.irq
    }

    fn parts(&mut self) -> (&SimulatedInterrupts, &mut RecordingPaging) {
        (&self.irq, &mut self.paging)
    }

    fn raise_timer_interrupt(&self) {}

    fn halt(&self) {}
}

type SimKernel<'a> = Kernel<'a, SimPlatform, &'a SimulatedPhysicalMemory>;

/// One identity-mapped table (4 MiB) with the heap placed at 2 MiB.
fn config() -> KernelConfig {
    KernelConfig {
        identity_mapped_tables: 1,
        heap_start: 0x0020_0000,
        heap_size: 0x0010_0000,
        ..KernelConfig::default()
    }
}

/// Kernel image and heap arena.
fn reserved() -> [Range<PhysicalAddress>; 1] {
    [PhysicalAddress::new(0x0010_0000)..PhysicalAddress::new(0x0030_0000)]
}

/// Frames free right after boot: all but frame 0, the reserved 2 MiB, the
/// kernel directory with its identity table and the four tables direct
/// mapping 16 MiB.
const FREE_AFTER_BOOT: u32 = FRAMES as u32 - 1 - 512 - 2 - 4;

struct Board {
    memory: SimulatedPhysicalMemory,
    bitmap: Vec<u32>,
    arena: Vec<u64>,
    heap: KernelHeap<SimulatedInterrupts>,
}

impl Board {
    fn new() -> Self {
        Self {
            memory: SimulatedPhysicalMemory::new(FRAMES),
            bitmap: vec![0; FRAMES / 32],
            arena: vec![0; 8 * 1024],
            heap: KernelHeap::new(SimulatedInterrupts::new(true)),
        }
    }

    fn try_boot(&mut self, config: KernelConfig) -> Result<SimKernel<'_>, BootError> {
        let regions = [MemoryRegion::available(0, self.memory.size())];
        let reserved = reserved();
        let params = BootParams {
            regions: &regions,
            reserved: &reserved,
            bitmap: &mut self.bitmap,
            heap: HeapArena {
                start: self.arena.as_mut_ptr().cast(),
                size: self.arena.len() * size_of::<u64>(),
            },
        };
        unsafe { Kernel::boot(SimPlatform::default(), &self.memory, config, params, &self.heap) }
    }

    fn boot(&mut self) -> SimKernel<'_> {
        self.try_boot(config()).unwrap()
    }
}

fn idle_frame() -> SavedRegisters {
    let mut frame = SavedRegisters::for_ring(Ring::Kernel);
    frame.eip = IDLE_EIP;
    frame.esp = 0x0018_0000;
    frame
}

fn entry(addr: u32) -> TaskParams<'static> {
    TaskParams::new(VirtualAddress::new(addr))
}

#[test]
fn boot_brings_up_every_subsystem() {
    let mut board = Board::new();
    let kernel = board.boot();

    let dir = kernel.vmm().kernel_directory();
    assert_eq!(kernel.platform().paging.loads, vec![dir.base()]);
    assert!(kernel.platform().paging.enabled);
    assert_eq!(
        kernel.vmm().translate(VirtualAddress::new(0x0030_1234)),
        Some(PhysicalAddress::new(0x0030_1234))
    );
    assert_eq!(kernel.vmm().translate(VirtualAddress::new(0x0040_0000)), None);
    let last = PhysicalAddress::new((FRAMES as u32 - 1) * 4096);
    assert_eq!(kernel.vmm().translate(direct_map(last)), Some(last));

    assert_eq!(kernel.frames().total_frames(), FRAMES as u32);
    assert_eq!(kernel.frames().free_frames(), FREE_AFTER_BOOT);

    let idle = kernel.current_task_id().unwrap();
    let tcb = kernel.task(idle).unwrap();
    assert_eq!(tcb.name(), "kernel_idle");
    assert_eq!(tcb.state(), TaskState::Running);
    assert_eq!(kernel.sleep_ticks(100), 10);
    drop(kernel);

    assert!(board.heap.is_initialized());
    assert!(!board.heap.kmalloc(128).is_null());
}

#[test]
fn boot_refuses_heap_outside_identity_map() {
    let mut board = Board::new();
    let config = KernelConfig {
        heap_start: 0x0040_0000,
        ..config()
    };
    assert!(matches!(
        board.try_boot(config),
        Err(BootError::HeapNotMapped { start: 0x0040_0000, .. })
    ));
}

#[test]
fn boot_reports_undersized_bitmap() {
    let mut board = Board::new();
    board.bitmap.truncate(4);
    assert!(matches!(
        board.try_boot(config()),
        Err(BootError::Frames(FrameAllocError::BitmapTooSmall { need: 128, have: 4 }))
    ));
}

#[test]
fn timer_ticks_rotate_through_tasks() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let t1 = kernel.create_task(entry(0x0011_0000).with_name("t1")).unwrap();
    let t2 = kernel.create_task(entry(0x0012_0000).with_name("t2")).unwrap();
    let t3 = kernel.create_task(entry(0x0013_0000).with_name("t3")).unwrap();
    let idle = kernel.current_task_id().unwrap();

    let mut frame = idle_frame();
    let mut order = Vec::new();
    for _ in 0..8 {
        kernel.timer_tick(&mut frame);
        order.push(kernel.current_task_id().unwrap());
    }
    assert_eq!(order, vec![t1, t2, t3, idle, t1, t2, t3, idle]);
    assert_eq!(frame, idle_frame());

    let stats = kernel.scheduler_stats();
    assert_eq!(stats.total_ticks, 8);
    assert_eq!(stats.context_switches, 8);
}

#[test]
fn new_task_resumes_at_its_entry() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let t1 = kernel.create_task(entry(0x0011_0000)).unwrap();
    let stack_top = kernel.task(t1).unwrap().kernel_stack().unwrap();

    let mut frame = idle_frame();
    kernel.timer_tick(&mut frame);
    assert_eq!(frame.eip, 0x0011_0000);
    assert_eq!(frame.esp, stack_top.as_u32() - 16);
    assert_eq!(frame.eflags, 0x202);
    assert_eq!(frame.cs, 0x08);
}

#[test]
fn exited_task_is_reaped_on_a_later_tick() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let idle = kernel.current_task_id().unwrap();
    let t1 = kernel.create_task(entry(0x0011_0000)).unwrap();
    assert_eq!(kernel.frames().free_frames(), FREE_AFTER_BOOT - 2);

    let mut frame = idle_frame();
    kernel.timer_tick(&mut frame);
    assert_eq!(kernel.current_task_id(), Some(t1));

    assert_eq!(kernel.exit_current_task(), Ok(t1));
    kernel.timer_tick(&mut frame);
    assert_eq!(kernel.current_task_id(), Some(idle));
    assert_eq!(frame, idle_frame());
    // Still the task whose stack the tick ran on.
    assert_eq!(kernel.task(t1).unwrap().state(), TaskState::Zombie);

    kernel.timer_tick(&mut frame);
    assert!(kernel.task(t1).is_none());
    assert_eq!(kernel.frames().free_frames(), FREE_AFTER_BOOT);
}

#[test]
fn last_task_keeps_running() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let idle = kernel.current_task_id().unwrap();

    assert_eq!(kernel.exit_current_task(), Err(TaskError::LastTask));
    assert_eq!(kernel.task(idle).unwrap().state(), TaskState::Running);
    assert_eq!(kernel.scheduler().ready_ring().collect::<Vec<_>>(), vec![idle]);
}

#[test]
fn kill_and_priority_through_the_facade() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let idle = kernel.current_task_id().unwrap();
    let t1 = kernel.create_task(entry(0x0011_0000)).unwrap();

    kernel.set_task_priority(t1, 99).unwrap();
    assert_eq!(kernel.task(t1).unwrap().priority(), 31);

    assert_eq!(kernel.kill_task(idle), Err(TaskError::IsCurrent(idle)));
    kernel.kill_task(t1).unwrap();

    let mut frame = idle_frame();
    kernel.timer_tick(&mut frame);
    assert!(kernel.task(t1).is_none());
    assert_eq!(kernel.current_task_id(), Some(idle));
    assert_eq!(kernel.frames().free_frames(), FREE_AFTER_BOOT);
}

#[test]
fn blocked_task_is_skipped_until_unblocked() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let idle = kernel.current_task_id().unwrap();
    let t1 = kernel.create_task(entry(0x0011_0000)).unwrap();

    kernel.block_task(t1).unwrap();
    let mut frame = idle_frame();
    kernel.timer_tick(&mut frame);
    assert_eq!(kernel.current_task_id(), Some(idle));

    kernel.unblock_task(t1).unwrap();
    kernel.timer_tick(&mut frame);
    assert_eq!(kernel.current_task_id(), Some(t1));
}

#[test]
fn mutating_calls_mask_interrupts() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let before = kernel.platform().irq.disable_count();

    kernel.create_task(entry(0x0011_0000)).unwrap();
    let frame = kernel.allocate_frame().unwrap();
    kernel.free_frame(frame).unwrap();

    assert_eq!(kernel.platform().irq.disable_count(), before + 3);
    assert!(kernel.platform().irq.interrupts_enabled());
}

#[test]
fn frame_facade_reports_double_free() {
    let mut board = Board::new();
    let mut kernel = board.boot();

    let frame = kernel.allocate_frame().unwrap();
    assert!(kernel.frames().is_used(frame));
    kernel.free_frame(frame).unwrap();
    assert_eq!(kernel.free_frame(frame), Err(FrameAllocError::AlreadyFree(frame)));
    assert_eq!(kernel.allocate_frame(), Some(frame));

    let beyond = PhysicalFrame::from_number(FRAMES as u32);
    assert_eq!(kernel.free_frame(beyond), Err(FrameAllocError::OutOfRange(beyond)));
}

#[test]
fn kernel_mappings_invalidate_the_tlb() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let frame = kernel.allocate_frame().unwrap();
    let va = VirtualAddress::new(0x0080_0000);

    kernel.map_page(va, frame).unwrap();
    assert_eq!(kernel.vmm().translate(va), Some(frame.base()));
    assert_eq!(kernel.platform().paging.invalidated, vec![va]);

    assert_eq!(kernel.unmap_page(va), Ok(frame));
    assert_eq!(kernel.vmm().translate(va), None);
    assert!(matches!(kernel.unmap_page(va), Err(VmmError::AddressSpace(_))));
}

#[test]
fn process_lifecycle_returns_every_frame() {
    let mut board = Board::new();
    let mut kernel = board.boot();

    let pid = kernel.create_process("init", VirtualAddress::new(0x0011_0000)).unwrap();
    // Directory, one table, 1024 copied frames and a two-frame stack.
    assert_eq!(kernel.frames().free_frames(), FREE_AFTER_BOOT - 1028);

    let process = kernel.process(pid).unwrap();
    assert_eq!(process.name(), "init");
    assert_ne!(process.directory(), kernel.vmm().kernel_directory());
    let main_task = process.main_task();
    assert_eq!(kernel.processes().count(), 1);

    kernel.kill_process(pid).unwrap();
    assert!(kernel.process(pid).is_none());
    assert_eq!(kernel.task(main_task).unwrap().state(), TaskState::Zombie);

    let mut frame = idle_frame();
    kernel.timer_tick(&mut frame);
    assert!(kernel.task(main_task).is_none());
    assert_eq!(kernel.frames().free_frames(), FREE_AFTER_BOOT);
}

#[test]
fn active_process_cannot_be_killed() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let pid = kernel.create_process("shell", VirtualAddress::new(0x0011_0000)).unwrap();
    let directory = kernel.process(pid).unwrap().directory();

    unsafe { kernel.set_current_process(pid) }.unwrap();
    assert_eq!(kernel.current_process(), Some(pid));
    assert_eq!(kernel.platform().paging.loads.last(), Some(&directory.base()));
    assert_eq!(
        kernel.kill_process(pid),
        Err(ProcessError::AddressSpace(VmmError::ActiveAddressSpace(directory)))
    );

    kernel.switch_to_kernel_space();
    assert_eq!(kernel.current_process(), None);
    assert_eq!(
        kernel.platform().paging.loads.last(),
        Some(&kernel.vmm().kernel_directory().base())
    );
    kernel.kill_process(pid).unwrap();
}

#[test]
fn process_memory_beyond_the_identity_map_stays_reachable() {
    let mut board = Board::new();
    let mut kernel = board.boot();
    let window = kernel.config().identity_map_size();
    assert!(window < board_bytes());

    let pid = kernel.create_process("init", VirtualAddress::new(0x0011_0000)).unwrap();
    let process = kernel.process(pid).unwrap();
    let directory = process.directory();
    let stack_top = kernel.task(process.main_task()).unwrap().kernel_stack().unwrap();
    let space = unsafe { kernel.vmm().space(directory) };

    let owned: Vec<PhysicalFrame> = space.owned_frames().collect();
    assert_eq!(owned.len(), 1026);
    let beyond = owned
        .iter()
        .filter(|f| u64::from(f.base().as_u32()) >= window)
        .count();
    assert!(beyond > 0, "the clone should spill past the identity map");

    for frame in owned {
        let va = direct_map(frame.base());
        assert_eq!(kernel.vmm().translate(va), Some(frame.base()), "{frame:?} from the kernel");
        assert_eq!(space.translate(va), Some(frame.base()), "{frame:?} from the process");
    }

    assert!(stack_top.as_u32() > DIRECT_MAP_BASE);
    let stack_byte = VirtualAddress::new(stack_top.as_u32() - 1);
    assert!(kernel.vmm().translate(stack_byte).is_some());
    assert_eq!(space.translate(stack_byte), kernel.vmm().translate(stack_byte));
}

fn board_bytes() -> u64 {
    FRAMES as u64 * 4096
}
