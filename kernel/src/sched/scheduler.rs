//! Core scheduler implementation
//!
//! Dispatch, the context switch primitive, the timer tick and the blocking
//! transitions. Every thread is held by exactly one of the ready queues, the
//! blocked set, the sleep queue or the running slot, and these functions are
//! the only code that moves it between them.

use alloc::vec::Vec;

use super::{BlockReason, Scheduler};
use crate::{
    arch::ContextHal,
    error::{KernelError, KernelResult, SchedError},
    mm::FrameAllocator,
    process::{Process, ProcessId, ProcessState, Thread, ThreadId, ThreadState},
};

/// Halt with a diagnostic when scheduler bookkeeping is inconsistent
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            panic!("[SCHED] invariant violated: {}", format_args!($($arg)+));
        }
    };
}

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Perform scheduling decision.
    ///
    /// A running thread keeps the CPU unless a thread at the same or a more
    /// urgent level is ready, in which case it goes to the tail of its level.
    /// Returns the running pair, or `None` when nothing is runnable and the
    /// caller should halt until the next interrupt.
    pub fn schedule(&mut self) -> Option<(ProcessId, ThreadId)> {
        let next = self.reschedule(true);
        self.check_invariants();
        next
    }

    /// Give up the CPU to the next thread at the same or a more urgent level
    pub fn yield_now(&mut self) -> Option<(ProcessId, ThreadId)> {
        if let Some((_, tid)) = self.current {
            log::trace!("[SCHED] Thread {} yielding", tid);
        }
        self.requeue_current();
        let next = self.reschedule(true);
        self.check_invariants();
        next
    }

    /// Handle one timer tick
    pub fn timer_interrupt(&mut self) {
        self.ticks += 1;
        let now = self.now_ms();
        let tick_ms = self.config.tick_ms as u64;

        match self.current {
            Some((pid, tid)) => {
                if let Some(thread) = self.threads.get_mut(tid.0) {
                    thread.cpu_time += tick_ms;
                }
                if let Some(process) = self.processes.get_mut(pid.0) {
                    process.cpu_time += tick_ms;
                }
            }
            None => self.idle_ticks += 1,
        }

        for tid in self.sleeping.pop_expired(now) {
            log::debug!("[SCHED] Thread {} woke at {}ms", tid, now);
            self.add_ready(tid);
        }

        self.apply_aging();

        let current = self.current;
        match current {
            Some((_, tid)) if self.config.preemptive => {
                let Some(thread) = self.threads.get_mut(tid.0) else {
                    panic!("[SCHED] invariant violated: running thread {} missing", tid);
                };
                thread.slice_remaining = thread.slice_remaining.saturating_sub(1);
                let expired = thread.slice_remaining == 0;
                let level = thread.effective_priority();
                let more_urgent = self.ready.highest_level().is_some_and(|l| l < level);

                if expired || more_urgent {
                    self.requeue_current();
                    let next = self.dispatch_next(false);
                    // Re-dispatching the same thread only refills its slice
                    if next.map(|(_, next_tid)| next_tid) != Some(tid) {
                        log::debug!(
                            "[SCHED] Preempted thread {} ({})",
                            tid,
                            if expired {
                                "slice expired"
                            } else {
                                "more urgent thread ready"
                            }
                        );
                        self.metrics.record_preemption();
                    }
                }
            }
            None if !self.ready.is_empty() => {
                self.dispatch_next(true);
            }
            _ => {}
        }

        log::trace!("[SCHED] Tick {} running {:?}", self.ticks, self.current);
        self.check_invariants();
    }

    /// Block a single thread
    pub fn block_thread(&mut self, tid: ThreadId, reason: BlockReason) -> KernelResult<()> {
        self.suspend_thread(tid, reason)?;
        self.check_invariants();
        Ok(())
    }

    /// Make a blocked thread ready again
    pub fn unblock_thread(&mut self, tid: ThreadId) -> KernelResult<()> {
        let state = self.thread_ref(tid)?.state();
        if !matches!(state, ThreadState::Blocked(_)) {
            return Err(KernelError::InvalidState {
                expected: "blocked",
                actual: state.name(),
            });
        }
        self.add_ready(tid);
        self.check_invariants();
        Ok(())
    }

    /// Block every ready or running thread of a process
    pub fn block(&mut self, pid: ProcessId, reason: BlockReason) -> KernelResult<()> {
        let process = self.live_process(pid)?;
        let runnable: Vec<ThreadId> = process
            .threads
            .iter()
            .copied()
            .filter(|&tid| self.threads.get(tid.0).is_some_and(Thread::is_runnable))
            .collect();
        if runnable.is_empty() {
            return Err(KernelError::InvalidState {
                expected: "ready or running",
                actual: process.state.name(),
            });
        }

        for tid in runnable {
            self.suspend_thread(tid, reason)?;
        }
        log::debug!("[SCHED] Process {} blocked on {:?}", pid, reason);
        self.check_invariants();
        Ok(())
    }

    /// Make every blocked thread of a process ready again
    pub fn unblock(&mut self, pid: ProcessId) -> KernelResult<()> {
        let process = self.live_process(pid)?;
        let blocked: Vec<ThreadId> = process
            .threads
            .iter()
            .copied()
            .filter(|&tid| self.blocked.contains(tid))
            .collect();
        if blocked.is_empty() {
            return Err(KernelError::InvalidState {
                expected: "blocked",
                actual: process.state.name(),
            });
        }

        for tid in blocked {
            self.add_ready(tid);
        }
        log::debug!("[SCHED] Process {} unblocked", pid);
        self.check_invariants();
        Ok(())
    }

    /// Put the running thread to sleep for `ms` and reschedule
    pub fn sleep_current(&mut self, ms: u64) -> KernelResult<Option<(ProcessId, ThreadId)>> {
        let (pid, tid) = self.current.ok_or(SchedError::NoCurrentThread)?;
        let wake_at = self.now_ms().saturating_add(ms);

        self.thread_mut(tid)?
            .set_state(ThreadState::Sleeping { wake_at });
        self.current = None;
        self.sleeping.insert(tid, wake_at);
        self.refresh_process_state(pid);
        log::debug!("[SCHED] Thread {} sleeping until {}ms", tid, wake_at);

        let next = self.reschedule(true);
        self.check_invariants();
        Ok(next)
    }

    /// Check every queue membership invariant, panicking on the first
    /// violation.
    ///
    /// Runs after each mutating operation in debug builds unless the
    /// `no-consistency-checks` feature is enabled.
    pub fn assert_consistent(&self) {
        for (id, thread) in self.threads.iter() {
            let tid = ThreadId(id);
            let owner = self.processes.get(thread.process.0);
            invariant!(
                owner.is_some_and(|p| p.threads.contains(&tid)),
                "thread {} not listed by its process {}",
                tid,
                thread.process
            );

            let queued = self.ready.level_of(tid);
            let blocked = self.blocked.reason_of(tid);
            let sleeping = self.sleeping.deadline_of(tid);
            let running = self.current.map(|(_, t)| t) == Some(tid);
            let memberships = [queued.is_some(), blocked.is_some(), sleeping.is_some(), running]
                .iter()
                .filter(|&&held| held)
                .count();
            invariant!(
                memberships == 1,
                "thread {} held by {} scheduler structures",
                tid,
                memberships
            );

            match thread.state() {
                ThreadState::Ready => invariant!(
                    queued == Some(thread.effective_priority()),
                    "ready thread {} queued at {:?}, expected level {}",
                    tid,
                    queued,
                    thread.effective_priority()
                ),
                ThreadState::Running => invariant!(
                    self.current == Some((thread.process, tid)),
                    "running thread {} is not current",
                    tid
                ),
                ThreadState::Blocked(reason) => invariant!(
                    blocked == Some(reason),
                    "thread {} blocked on {:?} but recorded as {:?}",
                    tid,
                    reason,
                    blocked
                ),
                ThreadState::Sleeping { wake_at } => invariant!(
                    sleeping == Some(wake_at),
                    "thread {} sleeping until {} but recorded as {:?}",
                    tid,
                    wake_at,
                    sleeping
                ),
                ThreadState::Terminated => {
                    invariant!(false, "terminated thread {} was not reclaimed", tid)
                }
            }
        }

        let entries = self.ready.len()
            + self.blocked.len()
            + self.sleeping.len()
            + usize::from(self.current.is_some());
        invariant!(
            entries == self.threads.len(),
            "{} queue entries for {} threads",
            entries,
            self.threads.len()
        );

        let mut zombies = 0;
        for (id, process) in self.processes.iter() {
            let pid = ProcessId(id);
            let derived = self.derive_state(process);
            invariant!(
                process.state == derived,
                "process {} recorded {:?} but threads give {:?}",
                pid,
                process.state,
                derived
            );
            invariant!(
                process.is_zombie() == self.zombies.contains(&pid),
                "process {} zombie set membership disagrees with {:?}",
                pid,
                process.state
            );
            if process.is_zombie() {
                zombies += 1;
                invariant!(
                    process.threads.is_empty(),
                    "zombie {} still has threads",
                    pid
                );
            }
            for tid in &process.threads {
                invariant!(
                    self.threads.get(tid.0).is_some_and(|t| t.process == pid),
                    "process {} lists foreign or missing thread {}",
                    pid,
                    tid
                );
            }
        }
        invariant!(
            zombies == self.zombies.len(),
            "zombie set holds {} entries for {} zombies",
            self.zombies.len(),
            zombies
        );
    }

    #[inline]
    pub(crate) fn check_invariants(&self) {
        #[cfg(all(debug_assertions, not(feature = "no-consistency-checks")))]
        self.assert_consistent();
    }

    /// Pick the next thread, rotating a still-running current thread when an
    /// equally or more urgent one waits
    pub(crate) fn reschedule(&mut self, voluntary: bool) -> Option<(ProcessId, ThreadId)> {
        self.metrics.record_schedule_call();

        if let Some((pid, tid)) = self.current {
            let level = self
                .threads
                .get(tid.0)
                .map_or(u8::MAX, Thread::effective_priority);
            match self.ready.highest_level() {
                Some(next) if next <= level => {
                    self.requeue_current();
                    return self.dispatch_next(false);
                }
                _ => return Some((pid, tid)),
            }
        }

        self.dispatch_next(voluntary)
    }

    /// Dispatch the head of the most urgent ready queue
    fn dispatch_next(&mut self, voluntary: bool) -> Option<(ProcessId, ThreadId)> {
        loop {
            let Some(tid) = self.ready.peek() else {
                self.metrics.record_idle_scheduled();
                log::trace!("[SCHED] Nothing runnable, idling");
                return None;
            };
            let Some(pid) = self.threads.get(tid.0).map(|t| t.process) else {
                panic!("[SCHED] invariant violated: queued thread {} missing", tid);
            };

            // A pending stop takes the whole process off the queues
            if self.take_pending_stop(pid) {
                continue;
            }

            self.ready.pop_front();
            self.dispatch(pid, tid, voluntary);
            return Some((pid, tid));
        }
    }

    /// Make `tid` (already dequeued) the running thread
    fn dispatch(&mut self, pid: ProcessId, tid: ThreadId, voluntary: bool) {
        self.consume_pending_signals(pid);

        let now = self.now_ms();
        let slice = self.config.slice_ticks();
        if let Some(thread) = self.threads.get_mut(tid.0) {
            thread.set_state(ThreadState::Running);
            thread.boost = 0;
            thread.slice_remaining = slice;
        }
        if let Some(process) = self.processes.get_mut(pid.0) {
            process.started_at.get_or_insert(now);
            process.last_scheduled = Some(now);
        }

        let from = self.on_cpu;
        self.context_switch(from, tid, voluntary);
        self.current = Some((pid, tid));
        self.refresh_process_state(pid);
        log::debug!("[SCHED] Dispatched thread {} of process {}", tid, pid);
    }

    /// Switch the CPU from `from` to `to`.
    ///
    /// Saves `from`'s registers, installs `to`'s address space when it
    /// belongs to another process, and restores `to`'s registers. This never
    /// blocks and is the only place register state crosses threads.
    pub(crate) fn context_switch(&mut self, from: Option<ThreadId>, to: ThreadId, voluntary: bool) {
        if from == Some(to) {
            return; // Already running
        }

        let Some(to_pid) = self.threads.get(to.0).map(|t| t.process) else {
            panic!("[SCHED] invariant violated: switching to unknown thread {}", to);
        };
        let Some(root) = self.processes.get(to_pid.0).map(|p| p.page_table_root) else {
            panic!("[SCHED] invariant violated: thread {} has no process", to);
        };

        // The outgoing thread may already have been reclaimed
        let mut switched_from = None;
        if let Some(from_tid) = from {
            if let Some(thread) = self.threads.get_mut(from_tid.0) {
                self.hal.save(&mut thread.context);
                if voluntary {
                    thread.voluntary_switches += 1;
                } else {
                    thread.involuntary_switches += 1;
                }
                switched_from = Some(voluntary);
            }
        }

        if self.active_space != Some(to_pid) {
            self.hal.switch_address_space(root);
            self.active_space = Some(to_pid);
        }

        let now = self.now_ms();
        if let Some(thread) = self.threads.get_mut(to.0) {
            self.hal.restore(&thread.context);
            thread.last_scheduled = Some(now);
        }

        self.metrics.record_context_switch(switched_from);
        self.on_cpu = Some(to);
        log::trace!("[SCHED] Context switch {:?} -> {}", from, to);
    }

    /// Put `tid` at the tail of its level and mark it READY.
    ///
    /// Accepts a running, blocked or sleeping thread and detaches it from
    /// whichever structure held it first.
    pub(crate) fn add_ready(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.get_mut(tid.0) else {
            return;
        };
        let was = thread.state();
        match was {
            ThreadState::Running => {
                if self.current.map(|(_, t)| t) == Some(tid) {
                    self.current = None;
                }
            }
            ThreadState::Blocked(reason) => {
                self.blocked.remove(tid);
                if reason.is_ipc() {
                    self.metrics.record_ipc_wakeup();
                }
            }
            ThreadState::Sleeping { .. } => {
                self.sleeping.remove(tid);
            }
            ThreadState::Ready | ThreadState::Terminated => {}
        }

        thread.set_state(ThreadState::Ready);
        thread.ready_since = self.ticks;
        let level = thread.effective_priority();
        let pid = thread.process;
        self.ready.push_back(tid, level);
        self.refresh_process_state(pid);
    }

    /// Take `tid` off the ready queues. The caller moves it to a new state.
    pub(crate) fn remove_ready(&mut self, tid: ThreadId) -> bool {
        self.ready.remove(tid).is_some()
    }

    /// Queue a freshly created thread
    pub(crate) fn enqueue_new(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.get_mut(tid.0) else {
            return;
        };
        thread.ready_since = self.ticks;
        let level = thread.effective_priority();
        let pid = thread.process;
        self.ready.push_back(tid, level);
        self.refresh_process_state(pid);
    }

    /// Move a ready or running thread into the blocked set
    pub(crate) fn suspend_thread(&mut self, tid: ThreadId, reason: BlockReason) -> KernelResult<()> {
        let thread = self
            .threads
            .get_mut(tid.0)
            .ok_or(KernelError::ThreadNotFound { tid: tid.0 })?;
        match thread.state() {
            ThreadState::Ready => {
                self.ready.remove(tid);
            }
            ThreadState::Running => {
                self.current = None;
            }
            other => {
                return Err(KernelError::InvalidState {
                    expected: "ready or running",
                    actual: other.name(),
                })
            }
        }

        thread.set_state(ThreadState::Blocked(reason));
        let pid = thread.process;
        self.blocked.insert(tid, reason);
        if reason.is_ipc() {
            self.metrics.record_ipc_block();
        }
        self.refresh_process_state(pid);
        log::debug!("[SCHED] Thread {} blocked on {:?}", tid, reason);
        Ok(())
    }

    /// Wake `tid` only if it is still blocked for a reason accepted by
    /// `matches`
    pub(crate) fn wake_if(&mut self, tid: ThreadId, matches: impl Fn(&BlockReason) -> bool) -> bool {
        match self.blocked.reason_of(tid) {
            Some(reason) if matches(&reason) => {
                self.add_ready(tid);
                true
            }
            _ => false,
        }
    }

    /// Wake every thread of `pid` blocked on exactly `reason`
    pub(crate) fn wake_process_waiters(&mut self, pid: ProcessId, reason: BlockReason) -> usize {
        let waiters: Vec<ThreadId> = self
            .blocked
            .blocked_on(&reason)
            .into_iter()
            .filter(|&tid| self.threads.get(tid.0).is_some_and(|t| t.process == pid))
            .collect();
        for &tid in &waiters {
            self.add_ready(tid);
        }
        waiters.len()
    }

    /// Send the running thread to the tail of its level
    pub(crate) fn requeue_current(&mut self) {
        if let Some((_, tid)) = self.current {
            self.add_ready(tid);
        }
    }

    /// Boost ready threads that waited a full aging threshold at one level
    fn apply_aging(&mut self) {
        let Some(threshold) = self.config.aging_threshold_ticks() else {
            return;
        };
        let now = self.ticks;

        let aged: Vec<ThreadId> = self
            .ready
            .iter()
            .filter(|&(tid, level)| {
                level > 0
                    && self
                        .threads
                        .get(tid.0)
                        .is_some_and(|t| now.saturating_sub(t.ready_since) >= threshold)
            })
            .map(|(tid, _)| tid)
            .collect();

        for tid in aged {
            let Some(thread) = self.threads.get_mut(tid.0) else {
                continue;
            };
            self.ready.remove(tid);
            thread.boost = (thread.boost + 1).min(thread.base_priority);
            thread.ready_since = now;
            let level = thread.effective_priority();
            self.ready.push_back(tid, level);
            self.metrics.record_aging_boost();
            log::trace!("[SCHED] Aged thread {} to level {}", tid, level);
        }
    }

    /// Recompute a process's cached state from its threads
    pub(crate) fn refresh_process_state(&mut self, pid: ProcessId) {
        let Some(process) = self.processes.get(pid.0) else {
            return;
        };
        let derived = self.derive_state(process);
        if let Some(process) = self.processes.get_mut(pid.0) {
            process.state = derived;
        }
    }

    /// State a process must be in given its threads
    pub(crate) fn derive_state(&self, process: &Process) -> ProcessState {
        if let ProcessState::Zombie(status) = process.state {
            return ProcessState::Zombie(status);
        }

        let states = || {
            process
                .threads
                .iter()
                .filter_map(|tid| self.threads.get(tid.0))
                .map(Thread::state)
        };
        if states().any(|s| s == ThreadState::Running) {
            ProcessState::Running
        } else if states().any(|s| s == ThreadState::Ready) {
            ProcessState::Ready
        } else if let Some(reason) = states().find_map(|s| match s {
            ThreadState::Blocked(reason) => Some(reason),
            _ => None,
        }) {
            ProcessState::Blocked(reason)
        } else if states().any(|s| matches!(s, ThreadState::Sleeping { .. })) {
            ProcessState::Sleeping
        } else {
            ProcessState::Created
        }
    }
}
