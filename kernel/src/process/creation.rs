//! Process and thread creation
//!
//! A new process gets a page-table root frame, a main thread with its own
//! stack mapping, and an entry on the ready queue of its priority. Both
//! tables are checked for room before anything is allocated.

use alloc::string::String;

use super::{Process, ProcessId, Stack, Thread, ThreadId};
use crate::{
    arch::{ContextHal, CpuContext},
    config::{DEFAULT_PRIORITY, MAX_NAME_LEN, MAX_PRIORITY},
    error::{KernelError, KernelResult, SchedError},
    mm::{page_align_up, FrameAllocator, MapPermissions, MappingKind},
    sched::Scheduler,
};

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Create a process whose main thread runs `entry(args)`.
    ///
    /// The parent is the running process, if any. The process is READY on
    /// return.
    pub fn create(
        &mut self,
        name: &str,
        entry: usize,
        args: usize,
        priority: u8,
    ) -> KernelResult<ProcessId> {
        if name.len() > MAX_NAME_LEN {
            return Err(KernelError::NameTooLong {
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }
        if priority > MAX_PRIORITY {
            return Err(SchedError::InvalidPriority { priority }.into());
        }
        if self.processes.is_full() {
            return Err(KernelError::ResourceExhausted {
                resource: "process table",
            });
        }
        if self.threads.is_full() {
            return Err(KernelError::ResourceExhausted {
                resource: "thread table",
            });
        }

        let root = self.frames.alloc_frames(1)?;
        let parent = self.current_pid();
        let ids = parent
            .and_then(|p| self.processes.get(p.0))
            .map_or((0, 0, 0, 0), |p| (p.uid, p.gid, p.euid, p.egid));
        let now = self.now_ms();
        let capacity = self.config.message_queue_capacity;

        let id = self.processes.insert_with(|id| {
            let mut process = Process::new(
                ProcessId(id),
                parent,
                String::from(name),
                priority,
                now,
                root,
                capacity,
            );
            (process.uid, process.gid, process.euid, process.egid) = ids;
            process.nice = priority as i8 - DEFAULT_PRIORITY as i8;
            process
        });
        let pid = match id {
            Ok(id) => ProcessId(id),
            Err(err) => {
                self.frames.free_frames(root, 1);
                return Err(err);
            }
        };
        if let Some(parent) = parent.and_then(|p| self.processes.get_mut(p.0)) {
            parent.children.push(pid);
        }

        let stack_size = self.config.default_stack_size;
        match self.spawn_thread(pid, entry, args, stack_size) {
            Ok(tid) => {
                if let Some(process) = self.processes.get_mut(pid.0) {
                    process.main_thread = Some(tid);
                }
                log::info!(
                    "[PROCESS] Created process {} ({}) priority {} with main thread {}",
                    pid,
                    name,
                    priority,
                    tid
                );
            }
            Err(err) => {
                log::warn!("[PROCESS] Creating main thread of {} failed: {}", name, err);
                self.discard_process(pid);
                return Err(err);
            }
        }

        self.check_invariants();
        Ok(pid)
    }

    /// Add a thread running `entry(args)` to `pid`.
    ///
    /// A `stack_size` of zero selects the configured default.
    pub fn thread_create(
        &mut self,
        pid: ProcessId,
        entry: usize,
        args: usize,
        stack_size: usize,
    ) -> KernelResult<ThreadId> {
        self.live_process(pid)?;
        let stack_size = match stack_size {
            0 => self.config.default_stack_size,
            size => size,
        };

        let tid = self.spawn_thread(pid, entry, args, stack_size)?;
        log::debug!("[PROCESS] Created thread {} in process {}", tid, pid);
        self.check_invariants();
        Ok(tid)
    }

    /// Build a thread with a fresh stack and queue it READY
    fn spawn_thread(
        &mut self,
        pid: ProcessId,
        entry: usize,
        args: usize,
        stack_size: usize,
    ) -> KernelResult<ThreadId> {
        if self.threads.is_full() {
            return Err(KernelError::ResourceExhausted {
                resource: "thread table",
            });
        }

        let size = page_align_up(stack_size)?;
        let priority = self.process_ref(pid)?.priority;
        let base = self.map_anonymous(pid, size, MapPermissions::READ_WRITE, MappingKind::Stack)?;
        let stack = Stack::new(base, size);
        let context = CpuContext::new_thread(entry, args, stack.top());

        let tid = match self
            .threads
            .insert_with(|id| Thread::new(ThreadId(id), pid, context, stack, priority))
        {
            Ok(id) => ThreadId(id),
            Err(err) => {
                if self.unmap(pid, base, size).is_err() {
                    log::warn!("[PROCESS] Stack of failed thread in {} not released", pid);
                }
                return Err(err);
            }
        };

        self.process_mut(pid)?.threads.push(tid);
        self.enqueue_new(tid);
        Ok(tid)
    }

    /// Undo a partially built process that never ran
    fn discard_process(&mut self, pid: ProcessId) {
        self.release_address_space(pid);
        let Some(process) = self.processes.remove(pid.0) else {
            return;
        };
        if let Some(parent) = process.parent.and_then(|p| self.processes.get_mut(p.0)) {
            parent.children.retain(|&child| child != pid);
        }
        self.frames.free_frames(process.page_table_root, 1);
    }
}
