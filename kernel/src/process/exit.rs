//! Process exit, cleanup and reaping
//!
//! Termination tears down every thread wherever it is queued, releases the
//! address space and IPC state, and leaves a zombie holding the exit status.
//! The PCB and its page-table root are freed only when the zombie is reaped,
//! by its parent's `wait` or immediately if it has no parent.

use alloc::vec::Vec;

use super::{ProcessId, ProcessState, ThreadId, ThreadState, WaitStatus};
use crate::{
    arch::ContextHal,
    config::MAX_FDS,
    error::{KernelError, KernelResult, SchedError},
    mm::FrameAllocator,
    sched::{BlockReason, Scheduler},
};

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Terminate `pid` with exit code `status`
    pub fn terminate(&mut self, pid: ProcessId, status: i32) -> KernelResult<()> {
        self.terminate_with(pid, WaitStatus::Exited(status))?;
        self.check_invariants();
        Ok(())
    }

    /// Terminate `pid`, recording `status` for its parent
    pub(crate) fn terminate_with(&mut self, pid: ProcessId, status: WaitStatus) -> KernelResult<()> {
        let process = self.process_ref(pid)?;
        if process.is_zombie() {
            return Err(KernelError::InvalidState {
                expected: "live process",
                actual: "zombie",
            });
        }

        let threads: Vec<ThreadId> = process.threads.clone();
        log::info!(
            "[PROCESS] Terminating process {} ({:?}, {} threads)",
            pid,
            status,
            threads.len()
        );
        for tid in threads {
            self.teardown_thread(tid);
        }
        self.make_zombie(pid, status);
        Ok(())
    }

    /// Exit one thread. The last thread to exit takes its process with it.
    pub fn thread_exit(&mut self, tid: ThreadId, code: i32) -> KernelResult<()> {
        let pid = self.thread_ref(tid)?.process;
        self.teardown_thread(tid);

        let last = self
            .processes
            .get(pid.0)
            .is_some_and(|p| p.threads.is_empty());
        if last {
            log::info!("[PROCESS] Last thread of process {} exited", pid);
            self.make_zombie(pid, WaitStatus::Exited(code));
        }
        self.check_invariants();
        Ok(())
    }

    /// Exit the running thread and pick the next one
    pub fn exit_current_thread(&mut self, code: i32) -> KernelResult<Option<(ProcessId, ThreadId)>> {
        let tid = self.current_tid().ok_or(SchedError::NoCurrentThread)?;
        self.thread_exit(tid, code)?;
        let next = self.reschedule(true);
        self.check_invariants();
        Ok(next)
    }

    /// Terminate the running process and pick the next thread
    pub fn exit_current(&mut self, code: i32) -> KernelResult<Option<(ProcessId, ThreadId)>> {
        let pid = self.current_pid().ok_or(SchedError::NoCurrentThread)?;
        self.terminate(pid, code)?;
        let next = self.reschedule(true);
        self.check_invariants();
        Ok(next)
    }

    /// Designate the process that adopts orphans
    pub fn set_reaper(&mut self, pid: ProcessId) -> KernelResult<()> {
        self.live_process(pid)?;
        self.reaper = Some(pid);
        log::info!("[PROCESS] Process {} is now the orphan reaper", pid);
        Ok(())
    }

    pub fn reaper(&self) -> Option<ProcessId> {
        self.reaper
    }

    /// Free a zombie's PCB, returning its pid and exit status
    pub(crate) fn reap(&mut self, pid: ProcessId) -> Option<(ProcessId, WaitStatus)> {
        if !self.zombies.remove(&pid) {
            return None;
        }
        let process = self.processes.remove(pid.0)?;
        if let Some(parent) = process.parent.and_then(|p| self.processes.get_mut(p.0)) {
            parent.children.retain(|&child| child != pid);
        }
        self.frames.free_frames(process.page_table_root, 1);
        if self.active_space == Some(pid) {
            self.active_space = None;
        }

        let status = process.exit_status.unwrap_or(WaitStatus::Exited(0));
        log::info!("[PROCESS] Reaped process {} ({:?})", pid, status);
        Some((pid, status))
    }

    /// Detach a thread from every scheduler structure and reclaim its TCB
    fn teardown_thread(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.get(tid.0) else {
            return;
        };
        let pid = thread.process;
        let stack = thread.stack;

        match thread.state() {
            ThreadState::Ready => {
                self.remove_ready(tid);
            }
            ThreadState::Running => {
                if self.current_tid() == Some(tid) {
                    self.current = None;
                }
            }
            ThreadState::Blocked(reason) => {
                self.blocked.remove(tid);
                // Withdraw from whichever queue the thread waits on
                match reason {
                    BlockReason::MessageSend { target } => {
                        if let Some(target) = self.processes.get_mut(target.0) {
                            target.messages.withdraw_sender(tid);
                        }
                    }
                    BlockReason::MessageReceive => {
                        if let Some(process) = self.processes.get_mut(pid.0) {
                            process.messages.remove_receiver(tid);
                        }
                    }
                    _ => {}
                }
            }
            ThreadState::Sleeping { .. } => {
                self.sleeping.remove(tid);
            }
            ThreadState::Terminated => {}
        }

        if let Some(mut thread) = self.threads.remove(tid.0) {
            thread.set_state(ThreadState::Terminated);
        }
        if self.on_cpu == Some(tid) {
            self.on_cpu = None;
        }
        if self.unmap(pid, stack.base, stack.size).is_err() {
            log::warn!("[PROCESS] Stack of thread {} was not mapped", tid);
        }
        if let Some(process) = self.processes.get_mut(pid.0) {
            process.threads.retain(|&t| t != tid);
            if process.main_thread == Some(tid) {
                process.main_thread = None;
            }
        }
        self.refresh_process_state(pid);
        log::debug!("[PROCESS] Thread {} of process {} terminated", tid, pid);
    }

    /// Turn a process with no threads left into a zombie
    fn make_zombie(&mut self, pid: ProcessId, status: WaitStatus) {
        self.release_address_space(pid);

        let Some(process) = self.processes.get_mut(pid.0) else {
            return;
        };
        process.fds = [None; MAX_FDS];
        let parked = process.messages.clear();
        process.pending_signals = 0;
        process.state = ProcessState::Zombie(status);
        process.has_exited = true;
        process.exit_status = Some(status);
        process.unreported_event = None;
        let children = core::mem::take(&mut process.children);
        let parent = process.parent;
        self.zombies.insert(pid);

        // Senders blocked on the dead queue fail over to READY with the
        // send recorded as failed
        for sender in parked {
            if self.wake_if(sender, |reason| {
                *reason == BlockReason::MessageSend { target: pid }
            }) {
                if let Some(thread) = self.threads.get_mut(sender.0) {
                    thread.failed_send = Some(pid);
                }
                log::debug!(
                    "[IPC] Parked message of thread {} dropped, process {} exited",
                    sender,
                    pid
                );
            }
        }

        self.adopt_orphans(pid, children);
        if self.reaper == Some(pid) {
            log::warn!("[PROCESS] Orphan reaper {} exited", pid);
            self.reaper = None;
        }

        match parent {
            Some(parent) if self.processes.contains(parent.0) => {
                self.wake_process_waiters(parent, BlockReason::WaitChild);
            }
            _ => {
                log::warn!("[PROCESS] Parentless zombie {} reaped", pid);
                self.reap(pid);
            }
        }
    }

    /// Hand the children of an exiting process to the reaper
    fn adopt_orphans(&mut self, pid: ProcessId, children: Vec<ProcessId>) {
        let reaper = self.reaper.filter(|&reaper| {
            reaper != pid && self.processes.get(reaper.0).is_some_and(|p| !p.is_zombie())
        });

        for child in children {
            let Some(process) = self.processes.get_mut(child.0) else {
                continue;
            };
            process.parent = reaper;
            let zombie = process.is_zombie();

            match reaper {
                Some(reaper) => {
                    if let Some(adopter) = self.processes.get_mut(reaper.0) {
                        adopter.children.push(child);
                    }
                    if zombie {
                        self.wake_process_waiters(reaper, BlockReason::WaitChild);
                    }
                    log::debug!("[PROCESS] Process {} adopted by {}", child, reaper);
                }
                None if zombie => {
                    log::warn!("[PROCESS] Orphaned zombie {} reaped", child);
                    self.reap(child);
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SchedConfig, sched::scheduler_init};

    fn with_parent() -> (Scheduler, ProcessId) {
        let mut s = scheduler_init(SchedConfig::default()).unwrap();
        let parent = s.create("parent", 0x1000, 0, 1).unwrap();
        s.schedule();
        (s, parent)
    }

    #[test]
    fn test_terminate_leaves_zombie() {
        let (mut s, parent) = with_parent();
        let child = s.create("child", 0x1000, 0, 10).unwrap();
        let tid = s.process(child).unwrap().main_thread.unwrap();

        s.terminate(child, 3).unwrap();
        let process = s.process(child).unwrap();
        assert_eq!(process.state(), ProcessState::Zombie(WaitStatus::Exited(3)));
        assert!(process.threads.is_empty());
        assert!(process.memory_map().is_empty());
        assert_eq!(s.thread(tid).map(|t| t.tid), None);
        assert_eq!(s.zombies(), [child]);
        assert_eq!(s.process(parent).unwrap().children, [child]);

        assert!(matches!(
            s.terminate(child, 0),
            Err(KernelError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_parentless_zombie_reaped_at_once() {
        let mut s = scheduler_init(SchedConfig::default()).unwrap();
        let free = s.frames().free_count();
        let pid = s.create("orphan", 0x1000, 0, 10).unwrap();

        s.terminate(pid, 0).unwrap();
        assert!(s.process(pid).is_none());
        assert_eq!(s.frames().free_count(), free);
    }

    #[test]
    fn test_last_thread_exit_ends_process() {
        let (mut s, _) = with_parent();
        let child = s.create("child", 0x1000, 0, 10).unwrap();
        let main = s.process(child).unwrap().main_thread.unwrap();
        let worker = s.thread_create(child, 0x2000, 0, 0).unwrap();

        s.thread_exit(main, 1).unwrap();
        assert_eq!(s.process(child).unwrap().main_thread, None);
        assert_eq!(s.process(child).unwrap().state(), ProcessState::Ready);

        s.thread_exit(worker, 4).unwrap();
        assert_eq!(
            s.process(child).unwrap().state(),
            ProcessState::Zombie(WaitStatus::Exited(4))
        );
    }

    #[test]
    fn test_children_move_to_reaper() {
        let (mut s, init) = with_parent();
        s.set_reaper(init).unwrap();
        let middle = s.create("middle", 0x1000, 0, 0).unwrap();
        // Let the middle process run so its child links to it
        s.schedule();
        assert_eq!(s.current_pid(), Some(middle));
        let grandchild = s.create("grandchild", 0x1000, 0, 10).unwrap();

        s.terminate(middle, 0).unwrap();
        assert_eq!(s.process(grandchild).unwrap().parent, Some(init));
        assert!(s.process(init).unwrap().children.contains(&grandchild));
    }

    #[test]
    fn test_exit_current_switches_away() {
        let (mut s, parent) = with_parent();
        let other = s.create("other", 0x1000, 0, 10).unwrap();
        assert_eq!(s.current_pid(), Some(parent));

        let next = s.exit_current(0).unwrap();
        assert_eq!(next.map(|(pid, _)| pid), Some(other));
        assert!(s.process(parent).is_none());
    }
}
