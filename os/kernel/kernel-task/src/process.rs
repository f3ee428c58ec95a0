//! # Processes
//!
//! A process pairs one ring 0 task with its own eagerly cloned copy of the
//! kernel address space. The table owns the process records; the scheduler
//! owns the task, the frame allocator the directory frames.

use crate::scheduler::{Scheduler, TaskError};
use crate::task::{TaskId, TaskParams, bounded_name};
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use kernel_alloc::vmm::{Vmm, VmmError};
use kernel_memory_addresses::{PhysicalFrame, VirtualAddress};
use kernel_sync::{InterruptControl, IrqGuard};
use kernel_vmem::{FrameAlloc, PagingControl, PhysMapper};
use log::{debug, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProcessState {
    Running,
    Ready,
    Blocked,
    Zombie,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("out of heap memory")]
    OutOfMemory,
    #[error("no process with id {0}")]
    NoSuchProcess(ProcessId),
    #[error(transparent)]
    AddressSpace(#[from] VmmError),
    #[error(transparent)]
    Task(#[from] TaskError),
}

#[derive(Debug)]
pub struct Process {
    pid: ProcessId,
    directory: PhysicalFrame,
    main_task: TaskId,
    name: String,
    state: ProcessState,
}

impl Process {
    #[must_use]
    pub const fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Root of the process's own address space.
    #[must_use]
    pub const fn directory(&self) -> PhysicalFrame {
        self.directory
    }

    #[must_use]
    pub const fn main_task(&self) -> TaskId {
        self.main_task
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }
}

#[derive(Debug)]
pub struct ProcessTable {
    processes: Vec<Process>,
    next_pid: u32,
    current: Option<ProcessId>,
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            processes: Vec::new(),
            next_pid: 1,
            current: None,
        }
    }

    /// Clone the kernel address space, start a ring 0 task at `entry` and
    /// record both as a new process.
    ///
    /// If the task cannot be created the cloned address space is released
    /// again, so a failed call leaves frame and heap usage unchanged.
    ///
    /// # Errors
    /// - [`ProcessError::OutOfMemory`] if the record cannot be stored.
    /// - [`ProcessError::AddressSpace`] if cloning ran out of frames.
    /// - [`ProcessError::Task`] if the task could not be created.
    pub fn create_process<M, A>(
        &mut self,
        vmm: &mut Vmm<M>,
        scheduler: &mut Scheduler,
        alloc: &mut A,
        name: &str,
        entry: VirtualAddress,
    ) -> Result<ProcessId, ProcessError>
    where
        M: PhysMapper,
        A: FrameAlloc + ?Sized,
    {
        if self.processes.try_reserve(1).is_err() {
            return Err(ProcessError::OutOfMemory);
        }
        let owned_name = bounded_name(name).ok_or(ProcessError::OutOfMemory)?;

        let directory = vmm.clone_kernel_space(alloc)?;
        let main_task = match scheduler.create_task(alloc, TaskParams::new(entry).with_name(name)) {
            Ok(id) => id,
            Err(e) => {
                // Safety: the directory was cloned above and is not shared.
                if let Err(free) = unsafe { vmm.free_space(directory, alloc) } {
                    warn!("process: could not release directory {directory}: {free}");
                }
                return Err(e.into());
            }
        };

        let pid = ProcessId(self.next_pid);
        self.next_pid = self.next_pid.wrapping_add(1);
        self.processes.push(Process {
            pid,
            directory,
            main_task,
            name: owned_name,
            state: ProcessState::Ready,
        });
        debug!("process: created {pid} '{name}' with task {main_task}, directory {directory}");
        Ok(pid)
    }

    /// Tear a process down: kill its main task, release its address space
    /// and drop the record.
    ///
    /// A main task that is currently running cannot be killed from here; it
    /// is left to exit on its own.
    ///
    /// # Errors
    /// - [`ProcessError::NoSuchProcess`] if `pid` is unknown.
    /// - [`ProcessError::AddressSpace`] with [`VmmError::ActiveAddressSpace`]
    ///   while the process's directory is loaded; nothing is changed.
    pub fn kill_process<M, A>(
        &mut self,
        pid: ProcessId,
        vmm: &mut Vmm<M>,
        scheduler: &mut Scheduler,
        alloc: &mut A,
    ) -> Result<(), ProcessError>
    where
        M: PhysMapper,
        A: FrameAlloc + ?Sized,
    {
        let index = self
            .processes
            .iter()
            .position(|p| p.pid == pid)
            .ok_or(ProcessError::NoSuchProcess(pid))?;
        let directory = self.processes[index].directory;
        if directory == vmm.current_directory() {
            warn!("process: refusing to kill {pid} while its address space is active");
            return Err(VmmError::ActiveAddressSpace(directory).into());
        }

        let main_task = self.processes[index].main_task;
        match scheduler.kill(main_task) {
            Ok(()) | Err(TaskError::NoSuchTask(_)) => {}
            Err(TaskError::IsCurrent(_)) => {
                debug!("process: main task {main_task} of {pid} is running, left to exit itself");
            }
            Err(e) => warn!("process: could not kill main task {main_task} of {pid}: {e}"),
        }

        let mut process = self.processes.remove(index);
        process.state = ProcessState::Zombie;
        if self.current == Some(pid) {
            self.current = None;
        }

        // Safety: the directory belongs to this process only and is not active.
        let released = unsafe { vmm.free_space(directory, alloc) }?;
        debug!("process: killed {pid} '{}', {released} frames released", process.name);
        Ok(())
    }

    /// Load a process's address space and make it the current process.
    ///
    /// # Errors
    /// [`ProcessError::NoSuchProcess`] if `pid` is unknown.
    ///
    /// # Safety
    /// The process's address space is a snapshot of the kernel's taken at
    /// creation. Kernel code and data reached while it is active must not
    /// depend on changes made after that snapshot.
    pub unsafe fn set_current<M, P, I>(
        &mut self,
        pid: ProcessId,
        vmm: &mut Vmm<M>,
        paging: &mut P,
        irq: &I,
    ) -> Result<(), ProcessError>
    where
        M: PhysMapper,
        P: PagingControl + ?Sized,
        I: InterruptControl + ?Sized,
    {
        let directory = self.get(pid).ok_or(ProcessError::NoSuchProcess(pid))?.directory;

        let guard = IrqGuard::new(irq);
        unsafe { vmm.switch_to(paging, directory, &guard) };
        for process in &mut self.processes {
            if process.pid == pid {
                process.state = ProcessState::Running;
            } else if process.state == ProcessState::Running {
                process.state = ProcessState::Ready;
            }
        }
        self.current = Some(pid);
        drop(guard);
        Ok(())
    }

    /// Load the kernel address space again; no process is current afterwards.
    pub fn switch_to_kernel<M, P, I>(&mut self, vmm: &mut Vmm<M>, paging: &mut P, irq: &I)
    where
        M: PhysMapper,
        P: PagingControl + ?Sized,
        I: InterruptControl + ?Sized,
    {
        let kernel = vmm.kernel_directory();
        let guard = IrqGuard::new(irq);
        // Safety: the kernel directory maps the kernel by construction.
        unsafe { vmm.switch_to(paging, kernel, &guard) };
        for process in &mut self.processes {
            if process.state == ProcessState::Running {
                process.state = ProcessState::Ready;
            }
        }
        self.current = None;
    }

    #[must_use]
    pub const fn current(&self) -> Option<ProcessId> {
        self.current
    }

    #[must_use]
    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> + '_ {
        self.processes.iter()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
