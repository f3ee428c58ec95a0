use kernel_alloc::vmm::{Vmm, VmmError};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::SimulatedInterrupts;
use kernel_task::{ProcessError, ProcessId, ProcessState, ProcessTable, Scheduler, TaskError, TaskState};
use kernel_task::SavedRegisters;
use kernel_vmem::sim::{SimFrameAlloc, SimulatedPhysicalMemory};
use kernel_vmem::PagingControl;

#[derive(Default)]
struct NullPaging {
    loaded: Option<PhysicalAddress>,
}

impl PagingControl for NullPaging {
    unsafe fn load_directory(&mut self, directory: PhysicalAddress) {
        self.loaded = Some(directory);
    }

    unsafe fn enable_paging(&mut self) {}

    fn invalidate_page(&mut self, _va: VirtualAddress) {}
}

struct World<'m> {
    vmm: Vmm<&'m SimulatedPhysicalMemory>,
    scheduler: Scheduler,
    alloc: SimFrameAlloc,
    paging: NullPaging,
    table: ProcessTable,
}

/// One identity-mapped table (frames 0..1024); cloning it costs 1026 frames.
fn world(mem: &SimulatedPhysicalMemory) -> World<'_> {
    let mut alloc = SimFrameAlloc::new(1024, 4096);
    let mut paging = NullPaging::default();
    let vmm = unsafe { Vmm::init(mem, &mut alloc, &mut paging, 1, 0) }.unwrap();
    let mut scheduler = Scheduler::new(10);
    scheduler.init("kernel_idle").unwrap();
    World {
        vmm,
        scheduler,
        alloc,
        paging,
        table: ProcessTable::new(),
    }
}

impl World<'_> {
    fn spawn(&mut self, name: &str) -> Result<ProcessId, ProcessError> {
        self.table.create_process(
            &mut self.vmm,
            &mut self.scheduler,
            &mut self.alloc,
            name,
            VirtualAddress::new(0x0010_0000),
        )
    }

    fn kill(&mut self, pid: ProcessId) -> Result<(), ProcessError> {
        self.table
            .kill_process(pid, &mut self.vmm, &mut self.scheduler, &mut self.alloc)
    }
}

#[test]
fn process_gets_a_private_copy_and_a_task() {
    let mem = SimulatedPhysicalMemory::new(4096);
    let mut w = world(&mem);
    mem.write(PhysicalAddress::new(0x7000), b"kernel");
    let before = w.alloc.outstanding();

    let pid = w.spawn("init").unwrap();
    assert_eq!(pid, ProcessId(1));
    assert_eq!(w.alloc.outstanding(), before + 1026 + 2);

    let process = w.table.get(pid).unwrap();
    assert_eq!(process.name(), "init");
    assert_eq!(process.state(), ProcessState::Ready);
    assert_ne!(process.directory(), w.vmm.kernel_directory());

    let space = unsafe { w.vmm.space(process.directory()) };
    let copy = space.translate(VirtualAddress::new(0x7000)).unwrap();
    assert_ne!(copy, PhysicalAddress::new(0x7000));
    assert_eq!(mem.read(copy, 6), b"kernel");

    let task = w.scheduler.task(process.main_task()).unwrap();
    assert_eq!(task.name(), "init");
    assert_eq!(task.state(), TaskState::Ready);
    assert_eq!(task.regs().eip, 0x0010_0000);
}

#[test]
fn kill_releases_everything() {
    let mem = SimulatedPhysicalMemory::new(4096);
    let mut w = world(&mem);
    let before = w.alloc.outstanding();

    let pid = w.spawn("victim").unwrap();
    let task = w.table.get(pid).unwrap().main_task();
    w.kill(pid).unwrap();

    assert!(w.table.is_empty());
    assert_eq!(w.scheduler.task(task).unwrap().state(), TaskState::Zombie);
    assert_eq!(w.scheduler.reap_zombies(&mut w.alloc), 1);
    assert_eq!(w.alloc.outstanding(), before);
    assert_eq!(w.kill(pid), Err(ProcessError::NoSuchProcess(pid)));
}

#[test]
fn failed_task_creation_releases_the_clone() {
    let mem = SimulatedPhysicalMemory::new(4096);
    let mut w = world(&mem);
    let before = w.alloc.outstanding();

    w.alloc.set_budget(Some(1026));
    assert_eq!(
        w.spawn("doomed"),
        Err(ProcessError::Task(TaskError::OutOfFrames))
    );
    assert_eq!(w.alloc.outstanding(), before);
    assert!(w.table.is_empty());
    assert_eq!(w.scheduler.task_count(), 1);
}

#[test]
fn failed_clone_leaves_no_trace() {
    let mem = SimulatedPhysicalMemory::new(4096);
    let mut w = world(&mem);
    let before = w.alloc.outstanding();

    w.alloc.set_budget(Some(10));
    assert_eq!(
        w.spawn("doomed"),
        Err(ProcessError::AddressSpace(VmmError::OutOfFrames))
    );
    assert_eq!(w.alloc.outstanding(), before);
    assert_eq!(w.scheduler.task_count(), 1);
}

#[test]
fn active_process_cannot_be_killed() {
    let mem = SimulatedPhysicalMemory::new(4096);
    let mut w = world(&mem);
    let irq = SimulatedInterrupts::new(true);
    let pid = w.spawn("shell").unwrap();
    let directory = w.table.get(pid).unwrap().directory();

    unsafe { w.table.set_current(pid, &mut w.vmm, &mut w.paging, &irq) }.unwrap();
    assert_eq!(irq.disable_count(), 1);
    assert_eq!(w.table.current(), Some(pid));
    assert_eq!(w.paging.loaded, Some(directory.base()));
    assert_eq!(w.table.get(pid).unwrap().state(), ProcessState::Running);

    assert_eq!(
        w.kill(pid),
        Err(ProcessError::AddressSpace(VmmError::ActiveAddressSpace(directory)))
    );
    assert_eq!(w.table.len(), 1);

    w.table.switch_to_kernel(&mut w.vmm, &mut w.paging, &irq);
    assert_eq!(w.table.current(), None);
    w.kill(pid).unwrap();
}

#[test]
fn running_main_task_is_left_to_exit() {
    let mem = SimulatedPhysicalMemory::new(4096);
    let mut w = world(&mem);
    let pid = w.spawn("busy").unwrap();
    let task = w.table.get(pid).unwrap().main_task();

    let mut frame = SavedRegisters::default();
    w.scheduler.schedule(&mut frame);
    assert_eq!(w.scheduler.current_id(), Some(task));

    w.kill(pid).unwrap();
    assert!(w.table.get(pid).is_none());
    assert_eq!(w.scheduler.task(task).unwrap().state(), TaskState::Running);
}

#[test]
fn unknown_process_cannot_become_current() {
    let mem = SimulatedPhysicalMemory::new(4096);
    let mut w = world(&mem);
    let irq = SimulatedInterrupts::new(true);
    let result = unsafe { w.table.set_current(ProcessId(7), &mut w.vmm, &mut w.paging, &irq) };
    assert_eq!(result, Err(ProcessError::NoSuchProcess(ProcessId(7))));
    assert_eq!(irq.disable_count(), 0);
}
