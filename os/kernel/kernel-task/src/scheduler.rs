//! # Round-Robin Scheduler
//!
//! Tasks live in an [`Arena`]; the ready queue is an intrusive circular list
//! threaded through [`Tcb::next`]. A task is on the ring exactly while it
//! is `Running` or `Ready`.
//!
//! ```text
//!          head
//!           │
//!   ┌──► [idle] ──► [T1] ──► [T2] ──┐
//!   └───────────────────────────────┘
//! ```
//!
//! Every timer tick calls [`Scheduler::schedule`] with the register frame the
//! interrupt entry saved. The frame is stored into the current task, the
//! successor on the ring is picked, and its snapshot is written back into
//! the frame for the interrupt return to restore.
//!
//! Mutating operations must run with interrupts masked; the caller owns that.

use crate::arena::{Arena, Handle};
use crate::registers::{Ring, SavedRegisters};
use crate::task::{Stack, TaskId, TaskInfo, TaskParams, TaskState, Tcb, bounded_name};
use kernel_info::memory::MAX_STACK_FRAMES;
use kernel_info::sched::{DEFAULT_PRIORITY, DEFAULT_TIME_SLICE, PRIORITY_IDLE};
use kernel_vmem::FrameAlloc;
use log::{debug, info, trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("out of physical frames")]
    OutOfFrames,
    #[error("out of heap memory")]
    OutOfMemory,
    #[error("no task with id {0}")]
    NoSuchTask(TaskId),
    #[error("the last runnable task cannot leave the ready ring")]
    LastTask,
    #[error("task {0} is currently running")]
    IsCurrent(TaskId),
    #[error("the scheduler is not initialized")]
    NotInitialized,
    #[error("task is in the wrong state for this operation")]
    InvalidState,
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SchedulerStats {
    pub total_ticks: u64,
    pub context_switches: u64,
    pub total_tasks: usize,
    pub running_tasks: usize,
    pub ready_tasks: usize,
    pub blocked_tasks: usize,
    pub zombie_tasks: usize,
}

pub struct Scheduler {
    tasks: Arena<Tcb>,
    current: Option<Handle>,
    head: Option<Handle>,
    next_id: u32,
    total_ticks: u64,
    context_switches: u64,
    tick_period_ms: u32,
}

impl Scheduler {
    /// An empty scheduler; call [`init`](Self::init) before anything else.
    #[must_use]
    pub const fn new(tick_period_ms: u32) -> Self {
        Self {
            tasks: Arena::new(),
            current: None,
            head: None,
            next_id: 1,
            total_ticks: 0,
            context_switches: 0,
            tick_period_ms: if tick_period_ms == 0 { 1 } else { tick_period_ms },
        }
    }

    /// Adopt the calling context as the idle task: `Running`, alone on the
    /// ready ring, current.
    ///
    /// # Errors
    /// - [`TaskError::InvalidState`] if already initialized.
    /// - [`TaskError::OutOfMemory`] if the control block cannot be stored.
    pub fn init(&mut self, idle_name: &str) -> Result<TaskId, TaskError> {
        if self.current.is_some() {
            return Err(TaskError::InvalidState);
        }

        let name = bounded_name(idle_name).ok_or(TaskError::OutOfMemory)?;
        let id = self.allocate_id();
        let idle = Tcb {
            id,
            regs: SavedRegisters::for_ring(Ring::Kernel),
            state: TaskState::Running,
            priority: DEFAULT_PRIORITY,
            time_slice: DEFAULT_TIME_SLICE,
            cpu_ticks: 0,
            ring: Ring::Kernel,
            name,
            next: None,
            stack: None,
            kernel_stack: None,
        };
        let handle = self.tasks.insert(idle).map_err(|_| TaskError::OutOfMemory)?;
        if let Some(tcb) = self.tasks.get_mut(handle) {
            tcb.next = Some(handle);
        }
        self.head = Some(handle);
        self.current = Some(handle);
        info!("scheduler: idle task {id} '{idle_name}' running");
        Ok(id)
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.current.is_some()
    }

    /// Create a `Ready` task and append it to the ready ring.
    ///
    /// The stack is one or two frames; the second is kept only if it
    /// directly follows the first. Ring 3 tasks additionally get a one-frame
    /// kernel stack for privilege transitions. On failure every frame taken
    /// so far is returned.
    ///
    /// # Errors
    /// - [`TaskError::NotInitialized`] before [`init`](Self::init).
    /// - [`TaskError::OutOfMemory`] if the control block cannot be stored.
    /// - [`TaskError::OutOfFrames`] if no stack frame is left.
    pub fn create_task<A: FrameAlloc + ?Sized>(
        &mut self,
        alloc: &mut A,
        params: TaskParams<'_>,
    ) -> Result<TaskId, TaskError> {
        if !self.is_initialized() {
            return Err(TaskError::NotInitialized);
        }
        if !self.tasks.reserve_one() {
            return Err(TaskError::OutOfMemory);
        }
        let name = bounded_name(params.name).ok_or(TaskError::OutOfMemory)?;

        let stack = allocate_stack(alloc, MAX_STACK_FRAMES).ok_or(TaskError::OutOfFrames)?;
        let kernel_stack = match params.ring {
            Ring::Kernel => None,
            Ring::User => {
                let Some(kstack) = allocate_stack(alloc, 1) else {
                    stack.release(alloc);
                    return Err(TaskError::OutOfFrames);
                };
                Some(kstack)
            }
        };

        let id = self.allocate_id();
        let tcb = Tcb {
            id,
            regs: SavedRegisters::for_entry(params.entry, stack.top(), params.ring),
            state: TaskState::Ready,
            priority: params.priority.min(PRIORITY_IDLE),
            time_slice: DEFAULT_TIME_SLICE,
            cpu_ticks: 0,
            ring: params.ring,
            name,
            next: None,
            stack: Some(stack),
            kernel_stack,
        };

        let handle = match self.tasks.insert(tcb) {
            Ok(handle) => handle,
            Err(mut tcb) => {
                tcb.release_stacks(alloc);
                return Err(TaskError::OutOfMemory);
            }
        };
        self.ring_append(handle);

        debug!(
            "scheduler: created task {id} '{}' ring {} entry {} stack top {}",
            params.name,
            params.ring as u8,
            params.entry,
            stack.top()
        );
        Ok(id)
    }

    /// Timer tick: save `frame` into the current task, advance to the
    /// successor on the ready ring and load its snapshot into `frame`.
    ///
    /// With a single task on the ring the successor is the task itself and
    /// `frame` comes back unchanged.
    pub fn schedule(&mut self, frame: &mut SavedRegisters) {
        let Some(current) = self.current else {
            return;
        };
        self.total_ticks += 1;

        if let Some(tcb) = self.tasks.get_mut(current) {
            tcb.regs = *frame;
            tcb.cpu_ticks += 1;
            tcb.time_slice = tcb.time_slice.saturating_sub(1);
            if tcb.state == TaskState::Running {
                tcb.state = TaskState::Ready;
            }
        }

        let Some(next) = self.next_runnable(current) else {
            // Nothing on the ring; keep the current context.
            if let Some(tcb) = self.tasks.get_mut(current)
                && tcb.state == TaskState::Ready
            {
                tcb.state = TaskState::Running;
            }
            return;
        };
        let Some(tcb) = self.tasks.get_mut(next) else {
            return;
        };

        tcb.state = TaskState::Running;
        tcb.time_slice = DEFAULT_TIME_SLICE;
        *frame = tcb.regs;
        if next != current {
            self.context_switches += 1;
            trace!("scheduler: switch to task {} at {:#x}", tcb.id, frame.eip);
        }
        self.current = Some(next);
    }

    /// The task to run after `current`: its ring successor, or the ring head
    /// if `current` has left the ring and its old successor is gone too.
    fn next_runnable(&self, current: Handle) -> Option<Handle> {
        let runnable = |h: &Handle| {
            self.tasks
                .get(*h)
                .is_some_and(|t| matches!(t.state, TaskState::Ready | TaskState::Running))
        };
        self.tasks
            .get(current)
            .and_then(|t| t.next)
            .filter(runnable)
            .or_else(|| self.head.filter(runnable))
    }

    /// Turn the current task into a zombie and take it off the ready ring.
    ///
    /// The caller then forces a tick; the task keeps running until then.
    ///
    /// # Errors
    /// - [`TaskError::NotInitialized`] without a current task.
    /// - [`TaskError::LastTask`] if the current task is the only one on the
    ///   ring; it stays `Running`.
    pub fn exit_current(&mut self) -> Result<TaskId, TaskError> {
        let current = self.current.ok_or(TaskError::NotInitialized)?;
        if self.is_sole_member(current) {
            warn!("scheduler: refusing to exit the last runnable task");
            return Err(TaskError::LastTask);
        }
        self.ring_unlink(current);
        let tcb = self.tasks.get_mut(current).ok_or(TaskError::InvalidState)?;
        tcb.state = TaskState::Zombie;
        debug!("scheduler: task {} '{}' exited", tcb.id, tcb.name);
        Ok(tcb.id)
    }

    /// Mark a task as a zombie and take it off the ready ring. Killing a
    /// zombie again succeeds without effect.
    ///
    /// # Errors
    /// - [`TaskError::NoSuchTask`] if `id` is unknown or already reaped.
    /// - [`TaskError::IsCurrent`] for the running task; it must exit itself.
    /// - [`TaskError::LastTask`] if `id` is the only task on the ring.
    pub fn kill(&mut self, id: TaskId) -> Result<(), TaskError> {
        let handle = self.find(id).ok_or(TaskError::NoSuchTask(id))?;
        if Some(handle) == self.current {
            warn!("scheduler: refusing to kill running task {id}");
            return Err(TaskError::IsCurrent(id));
        }

        match self.state_of(handle) {
            Some(TaskState::Zombie) => return Ok(()),
            Some(TaskState::Ready | TaskState::Running) => {
                if self.is_sole_member(handle) {
                    return Err(TaskError::LastTask);
                }
                self.ring_unlink(handle);
            }
            Some(TaskState::Blocked) | None => {}
        }
        if let Some(tcb) = self.tasks.get_mut(handle) {
            tcb.state = TaskState::Zombie;
        }
        debug!("scheduler: killed task {id}");
        Ok(())
    }

    /// Take a `Ready` or `Running` task off the ring. A running task keeps
    /// the CPU until the next tick.
    ///
    /// # Errors
    /// - [`TaskError::NoSuchTask`] if `id` is unknown.
    /// - [`TaskError::InvalidState`] if the task is blocked or a zombie.
    /// - [`TaskError::LastTask`] if it is the only task on the ring.
    pub fn block(&mut self, id: TaskId) -> Result<(), TaskError> {
        let handle = self.find(id).ok_or(TaskError::NoSuchTask(id))?;
        if !matches!(self.state_of(handle), Some(TaskState::Ready | TaskState::Running)) {
            return Err(TaskError::InvalidState);
        }
        if self.is_sole_member(handle) {
            warn!("scheduler: refusing to block the last runnable task {id}");
            return Err(TaskError::LastTask);
        }
        self.ring_unlink(handle);
        if let Some(tcb) = self.tasks.get_mut(handle) {
            tcb.state = TaskState::Blocked;
        }
        debug!("scheduler: blocked task {id}");
        Ok(())
    }

    /// Put a blocked task back at the end of the ring.
    ///
    /// # Errors
    /// - [`TaskError::NoSuchTask`] if `id` is unknown.
    /// - [`TaskError::InvalidState`] if the task is not blocked.
    pub fn unblock(&mut self, id: TaskId) -> Result<(), TaskError> {
        let handle = self.find(id).ok_or(TaskError::NoSuchTask(id))?;
        if self.state_of(handle) != Some(TaskState::Blocked) {
            return Err(TaskError::InvalidState);
        }
        if let Some(tcb) = self.tasks.get_mut(handle) {
            tcb.state = TaskState::Ready;
        }
        self.ring_append(handle);
        debug!("scheduler: unblocked task {id}");
        Ok(())
    }

    /// Release the stacks and control blocks of all zombies except the
    /// current task, whose stack may still be in use.
    ///
    /// Returns the number of tasks reaped.
    pub fn reap_zombies<A: FrameAlloc + ?Sized>(&mut self, alloc: &mut A) -> usize {
        let current = self.current;
        let mut reaped = 0;
        loop {
            let victim = self
                .tasks
                .iter()
                .find(|(h, t)| t.state == TaskState::Zombie && Some(*h) != current)
                .map(|(h, _)| h);
            let Some(mut tcb) = victim.and_then(|h| self.tasks.remove(h)) else {
                break;
            };
            let frames = tcb.owned_frames();
            tcb.release_stacks(alloc);
            debug!("scheduler: reaped task {} '{}', {frames} frames released", tcb.id, tcb.name);
            reaped += 1;
        }
        reaped
    }

    /// Change a task's priority, capped at [`PRIORITY_IDLE`]. Selection stays
    /// round robin.
    ///
    /// # Errors
    /// [`TaskError::NoSuchTask`] if `id` is unknown.
    pub fn set_priority(&mut self, id: TaskId, priority: u32) -> Result<(), TaskError> {
        let handle = self.find(id).ok_or(TaskError::NoSuchTask(id))?;
        let tcb = self.tasks.get_mut(handle).ok_or(TaskError::NoSuchTask(id))?;
        tcb.priority = priority.min(PRIORITY_IDLE);
        Ok(())
    }

    #[must_use]
    pub fn current_id(&self) -> Option<TaskId> {
        self.current.and_then(|h| self.tasks.get(h)).map(|t| t.id)
    }

    #[must_use]
    pub fn current(&self) -> Option<&Tcb> {
        self.current.and_then(|h| self.tasks.get(h))
    }

    /// Look up a task by id; reaped tasks are gone.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&Tcb> {
        self.tasks.iter().map(|(_, t)| t).find(|t| t.id == id)
    }

    /// All tasks, including blocked tasks and unreaped zombies.
    pub fn tasks(&self) -> impl Iterator<Item = TaskInfo<'_>> + '_ {
        self.tasks.iter().map(|(_, t)| t.info())
    }

    /// Ids on the ready ring, starting at the head.
    pub fn ready_ring(&self) -> impl Iterator<Item = TaskId> + '_ {
        let head = self.head;
        let mut curr = head;
        let mut remaining = self.tasks.len();
        core::iter::from_fn(move || {
            let handle = curr?;
            remaining = remaining.checked_sub(1)?;
            let tcb = self.tasks.get(handle)?;
            curr = tcb.next.filter(|&n| Some(n) != head);
            Some(tcb.id)
        })
    }

    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            total_ticks: self.total_ticks,
            context_switches: self.context_switches,
            total_tasks: self.tasks.len(),
            ..SchedulerStats::default()
        };
        for (_, tcb) in self.tasks.iter() {
            match tcb.state {
                TaskState::Running => stats.running_tasks += 1,
                TaskState::Ready => stats.ready_tasks += 1,
                TaskState::Blocked => stats.blocked_tasks += 1,
                TaskState::Zombie => stats.zombie_tasks += 1,
            }
        }
        stats
    }

    /// Number of yields that approximate a sleep of `ms` milliseconds.
    #[must_use]
    pub const fn sleep_ticks(&self, ms: u32) -> u32 {
        ms / self.tick_period_ms
    }

    fn allocate_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    fn find(&self, id: TaskId) -> Option<Handle> {
        self.tasks.iter().find(|(_, t)| t.id == id).map(|(h, _)| h)
    }

    fn state_of(&self, handle: Handle) -> Option<TaskState> {
        self.tasks.get(handle).map(|t| t.state)
    }

    fn next_of(&self, handle: Handle) -> Option<Handle> {
        self.tasks.get(handle).and_then(|t| t.next)
    }

    fn set_next(&mut self, handle: Handle, next: Handle) {
        if let Some(tcb) = self.tasks.get_mut(handle) {
            tcb.next = Some(next);
        }
    }

    fn is_sole_member(&self, handle: Handle) -> bool {
        self.head == Some(handle) && self.next_of(handle) == Some(handle)
    }

    /// The ring node whose successor is `target`.
    fn ring_predecessor(&self, target: Handle) -> Option<Handle> {
        let head = self.head?;
        let mut node = head;
        for _ in 0..=self.tasks.len() {
            let next = self.next_of(node)?;
            if next == target {
                return Some(node);
            }
            if next == head {
                return None;
            }
            node = next;
        }
        None
    }

    fn ring_append(&mut self, handle: Handle) {
        match self.head {
            None => {
                self.set_next(handle, handle);
                self.head = Some(handle);
            }
            Some(head) => {
                let tail = self.ring_predecessor(head).unwrap_or(head);
                self.set_next(tail, handle);
                self.set_next(handle, head);
            }
        }
    }

    /// Unlink `handle` from the ring. Its own `next` is left as is.
    fn ring_unlink(&mut self, handle: Handle) {
        let Some(prev) = self.ring_predecessor(handle) else {
            return;
        };
        let Some(next) = self.next_of(handle) else {
            return;
        };
        if prev == handle {
            self.head = None;
            return;
        }
        self.set_next(prev, next);
        if self.head == Some(handle) {
            self.head = Some(next);
        }
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("current", &self.current_id())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// One or two frames for a stack; a second frame is only kept if it
/// extends the first contiguously.
fn allocate_stack<A: FrameAlloc + ?Sized>(alloc: &mut A, max_frames: usize) -> Option<Stack> {
    let base = alloc.alloc_4k()?;
    let mut stack = Stack { base, frames: 1 };
    if max_frames > 1
        && let Some(extra) = alloc.alloc_4k()
    {
        if extra == base.next() {
            stack.frames = 2;
        } else {
            trace!("scheduler: stack frame {extra} not contiguous with {base}, using one frame");
            alloc.free_4k(extra);
        }
    }
    Some(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::VirtualAddress;
    use kernel_vmem::sim::SimFrameAlloc;

    fn scheduler() -> Scheduler {
        let mut s = Scheduler::new(10);
        s.init("kernel_idle").unwrap();
        s
    }

    #[test]
    fn stack_frames_stay_contiguous() {
        let mut alloc = SimFrameAlloc::new(0x100, 0x200);
        let stack = allocate_stack(&mut alloc, 2).unwrap();
        assert_eq!(stack.frames(), 2);

        // Free a lone frame so the reuse list hands out a non-adjacent pair.
        let lone = alloc.alloc_4k().unwrap();
        let _gap = alloc.alloc_4k().unwrap();
        alloc.free_4k(lone);
        let stack = allocate_stack(&mut alloc, 2).unwrap();
        assert_eq!(stack.frames(), 1);
        assert_eq!(stack.base, lone);
        assert_eq!(alloc.outstanding(), 2 + 1 + 1);
    }

    #[test]
    fn init_twice_is_rejected() {
        let mut s = scheduler();
        assert_eq!(s.init("again"), Err(TaskError::InvalidState));
        assert_eq!(s.task_count(), 1);
    }

    #[test]
    fn ring_unlink_repoints_head() {
        let mut alloc = SimFrameAlloc::new(0x100, 0x200);
        let mut s = scheduler();
        let idle = s.current_id().unwrap();
        let t = s
            .create_task(&mut alloc, TaskParams::new(VirtualAddress::new(0x1000)))
            .unwrap();

        // Move idle out of the ring: the head must follow.
        s.block(idle).unwrap();
        assert_eq!(s.ready_ring().collect::<Vec<_>>(), vec![t]);
        s.unblock(idle).unwrap();
        assert_eq!(s.ready_ring().collect::<Vec<_>>(), vec![t, idle]);
    }

    #[test]
    fn sleep_converts_milliseconds_to_ticks() {
        let s = scheduler();
        assert_eq!(s.sleep_ticks(0), 0);
        assert_eq!(s.sleep_ticks(9), 0);
        assert_eq!(s.sleep_ticks(100), 10);
        assert_eq!(Scheduler::new(0).sleep_ticks(5), 5);
    }
}
