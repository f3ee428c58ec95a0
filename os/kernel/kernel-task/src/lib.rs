//! # Tasks, Scheduling and Processes
//!
//! - [`Scheduler`]: task control blocks in a generation-checked arena, a
//!   circular ready ring, the per-tick [`Scheduler::schedule`] switch and
//!   zombie reaping.
//! - [`ProcessTable`]: processes pairing one task with a cloned address space.
//! - [`SavedRegisters`]: the register frame exchanged with the interrupt entry.
//!
//! The crate never touches interrupt masking for scheduler operations; the
//! kernel wraps every mutating call in an `IrqGuard`.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod arena;
pub mod process;
pub mod registers;
pub mod scheduler;
pub mod task;

pub use process::{Process, ProcessError, ProcessId, ProcessState, ProcessTable};
pub use registers::{Ring, SavedRegisters};
pub use scheduler::{Scheduler, SchedulerStats, TaskError};
pub use task::{TaskId, TaskInfo, TaskParams, TaskState, Tcb};
