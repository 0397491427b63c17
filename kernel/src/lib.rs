//! TBOS Kernel Scheduling Core
//!
//! This library provides process and thread lifecycle management, a
//! 40-level preemptive priority scheduler with aging, per-process memory map
//! bookkeeping, and message/shared-memory IPC.
//!
//! All state lives in one [`sched::Scheduler`] context object that is passed
//! by reference to every operation. Hardware is reached only through two
//! seams: [`arch::ContextHal`] for register save/restore and address space
//! installation, and [`mm::FrameAllocator`] for physical frames. Both have
//! software implementations so the whole core runs on a host under test.
//!
//! `no_std` is suppressed during test builds so the standard test harness
//! can drive the scheduler directly.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod ipc;
pub mod mm;
pub mod process;
pub mod sched;
pub mod stats;

// Re-export the caller surface
pub use config::{SchedConfig, NUM_PRIORITIES, TBOS_MAX_PROCESSES, TBOS_MAX_THREADS};
pub use error::{IpcError, KernelError, KernelResult, MemError, SchedError};
pub use mm::{MapPermissions, PhysicalAddress, VirtualAddress};
pub use process::{
    ProcessId, ProcessInfo, ProcessState, Signal, ThreadId, ThreadState, WaitOptions, WaitStatus,
};
pub use sched::{scheduler_init, BlockReason, Completion, Scheduler};
pub use stats::{MemoryUsage, SchedulerStats};
