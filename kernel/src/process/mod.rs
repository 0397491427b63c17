//! Process management module
//!
//! This module provides the process and thread half of the scheduling core:
//! - Process Control Block (PCB) and thread control block definitions
//! - Dense id tables for both
//! - Process lifecycle (creation, termination, reaping)
//! - Signals and `wait`
//!
//! Lifecycle operations are methods on [`crate::sched::Scheduler`], split by
//! concern across the submodules. Queries and per-process tunables live
//! here.

use alloc::vec::Vec;

pub mod creation;
pub mod exit;
pub mod pcb;
pub mod signal;
pub mod table;
pub mod thread;
pub mod wait;

// Re-export common types
pub use pcb::{FileHandle, MemoryStats, Process, ProcessId, ProcessInfo, ProcessState};
pub use signal::Signal;
pub use table::IdTable;
pub use thread::{Stack, Thread, ThreadId, ThreadState};
pub use wait::{WaitOptions, WaitStatus};

use crate::{
    arch::ContextHal,
    config::{DEFAULT_PRIORITY, MAX_NICE, MAX_PRIORITY, MIN_NICE},
    error::{KernelError, KernelResult, SchedError},
    mm::FrameAllocator,
    sched::{Completion, Scheduler},
};

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Shell-facing name for [`Scheduler::create`]
    pub fn process_create(
        &mut self,
        name: &str,
        entry: usize,
        args: usize,
        priority: u8,
    ) -> KernelResult<ProcessId> {
        self.create(name, entry, args, priority)
    }

    /// Shell-facing name for [`Scheduler::terminate`]
    pub fn process_terminate(&mut self, pid: ProcessId, status: i32) -> KernelResult<()> {
        self.terminate(pid, status)
    }

    /// Shell-facing name for [`Scheduler::kill`]
    pub fn process_kill(&mut self, pid: ProcessId, signal: u8) -> KernelResult<()> {
        self.kill(pid, signal)
    }

    /// Shell-facing name for [`Scheduler::wait`]
    pub fn process_wait(
        &mut self,
        target: Option<ProcessId>,
        options: WaitOptions,
    ) -> KernelResult<Completion<(ProcessId, WaitStatus)>> {
        self.wait(target, options)
    }

    /// Snapshot of one process
    pub fn process_get(&self, pid: ProcessId) -> KernelResult<ProcessInfo> {
        Ok(self.process_ref(pid)?.info())
    }

    /// Snapshots of every process, zombies included, in pid order
    pub fn process_list(&self) -> Vec<ProcessInfo> {
        self.processes.iter().map(|(_, p)| p.info()).collect()
    }

    /// Change a process's priority.
    ///
    /// Threads that were given their own priority keep it.
    pub fn set_priority(&mut self, pid: ProcessId, priority: u8) -> KernelResult<()> {
        if priority > MAX_PRIORITY {
            return Err(SchedError::InvalidPriority { priority }.into());
        }
        self.live_process(pid)?;

        let process = self.process_mut(pid)?;
        process.priority = priority;
        process.nice = priority as i8 - DEFAULT_PRIORITY as i8;
        let threads = process.threads.clone();
        for tid in threads {
            self.retarget_thread(tid, priority, false);
        }

        log::debug!("[SCHED] Process {} priority set to {}", pid, priority);
        self.check_invariants();
        Ok(())
    }

    pub fn get_priority(&self, pid: ProcessId) -> KernelResult<u8> {
        Ok(self.process_ref(pid)?.priority)
    }

    /// Set the nice value, deriving priority as `DEFAULT_PRIORITY + nice`
    pub fn set_nice(&mut self, pid: ProcessId, nice: i8) -> KernelResult<()> {
        if !(MIN_NICE..=MAX_NICE).contains(&nice) {
            return Err(SchedError::InvalidNice { nice }.into());
        }
        let priority = (DEFAULT_PRIORITY as i16 + nice as i16).clamp(0, MAX_PRIORITY as i16) as u8;
        self.set_priority(pid, priority)?;
        self.process_mut(pid)?.nice = nice;
        Ok(())
    }

    /// Give one thread its own priority
    pub fn thread_set_priority(&mut self, tid: ThreadId, priority: u8) -> KernelResult<()> {
        if priority > MAX_PRIORITY {
            return Err(SchedError::InvalidPriority { priority }.into());
        }
        self.thread_ref(tid)?;
        self.retarget_thread(tid, priority, true);
        log::debug!("[SCHED] Thread {} priority set to {}", tid, priority);
        self.check_invariants();
        Ok(())
    }

    pub fn thread_get_priority(&self, tid: ThreadId) -> KernelResult<u8> {
        Ok(self.thread_ref(tid)?.base_priority())
    }

    pub fn thread_state(&self, tid: ThreadId) -> KernelResult<ThreadState> {
        Ok(self.thread_ref(tid)?.state())
    }

    /// Store `handle` in the lowest free descriptor slot
    pub fn fd_install(&mut self, pid: ProcessId, handle: FileHandle) -> KernelResult<usize> {
        self.live_process(pid)?;
        let fds = &mut self.process_mut(pid)?.fds;
        let fd = fds
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::ResourceExhausted {
                resource: "file descriptor table",
            })?;
        fds[fd] = Some(handle);
        Ok(fd)
    }

    pub fn fd_get(&self, pid: ProcessId, fd: usize) -> KernelResult<FileHandle> {
        self.process_ref(pid)?
            .fds
            .get(fd)
            .copied()
            .flatten()
            .ok_or(KernelError::InvalidArgument {
                name: "fd",
                value: "not open",
            })
    }

    /// Close a descriptor, returning the handle it held
    pub fn fd_close(&mut self, pid: ProcessId, fd: usize) -> KernelResult<FileHandle> {
        self.process_mut(pid)?
            .fds
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(KernelError::InvalidArgument {
                name: "fd",
                value: "not open",
            })
    }

    /// Move a thread to a new base priority, re-queuing it if ready
    fn retarget_thread(&mut self, tid: ThreadId, priority: u8, explicit: bool) {
        let Some(thread) = self.threads.get_mut(tid.0) else {
            return;
        };
        if thread.explicit_priority && !explicit {
            return;
        }
        thread.explicit_priority |= explicit;
        thread.base_priority = priority;
        thread.boost = thread.boost.min(priority);

        if thread.state() == ThreadState::Ready {
            let level = thread.effective_priority();
            if self.ready.level_of(tid) != Some(level) {
                self.ready.remove(tid);
                self.ready.push_back(tid, level);
            }
        }
    }
}
