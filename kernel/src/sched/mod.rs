//! Process and thread scheduling module
//!
//! Implements a 40-level preemptive priority scheduler with:
//! - FIFO ordering within each priority level
//! - Aging of waiting threads as the anti-starvation mechanism
//! - Time-slice and urgency based preemption from the timer tick
//! - Blocked and sleeping sets that never overlap the ready queues
//!
//! All scheduling state lives in [`Scheduler`], which every operation takes
//! by `&mut`. Process, memory and IPC operations are implemented on it in
//! their own modules. [`global`] wraps one instance behind a lock for
//! kernels that need a process-wide scheduler.

use alloc::{collections::BTreeSet, vec::Vec};

pub mod blocking;
pub mod global;
pub mod metrics;
pub mod queue;
pub mod scheduler;

pub use blocking::{BlockReason, BlockedSet, SleepQueue};
pub use metrics::{MetricsSummary, SchedulerMetrics};
pub use queue::ReadyQueues;

use crate::{
    arch::{ContextHal, SoftContext},
    config::SchedConfig,
    error::{KernelError, KernelResult},
    ipc::SharedMemoryRegistry,
    mm::{FrameAllocator, RangeFrameAllocator},
    process::{IdTable, Process, ProcessId, Signal, Thread, ThreadId, WaitStatus},
};

/// Outcome of an operation that may suspend its caller.
///
/// `Suspended` means the calling thread was blocked and another thread may
/// now be running. Receive and wait are restarted by the caller once woken;
/// a suspended send completes on its own when space frees, or fails if the
/// target exits first (see [`Scheduler::take_send_failure`]).
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<T> {
    Done(T),
    Suspended,
}

impl<T> Completion<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }

    /// The value, if the operation completed
    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Suspended => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Completion<U> {
        match self {
            Self::Done(value) => Completion::Done(f(value)),
            Self::Suspended => Completion::Suspended,
        }
    }
}

/// Scheduler state
///
/// `H` moves register state and installs address spaces, `F` supplies
/// physical frames. Both default to the software implementations.
pub struct Scheduler<H: ContextHal = SoftContext, F: FrameAllocator = RangeFrameAllocator> {
    pub(crate) config: SchedConfig,
    pub(crate) processes: IdTable<Process>,
    pub(crate) threads: IdTable<Thread>,
    pub(crate) ready: ReadyQueues,
    pub(crate) blocked: BlockedSet,
    pub(crate) sleeping: SleepQueue,
    pub(crate) zombies: BTreeSet<ProcessId>,
    /// Currently running (process, thread) pair
    pub(crate) current: Option<(ProcessId, ThreadId)>,
    /// Thread whose registers are live on the CPU. Differs from `current`
    /// after the running thread blocks and before the next dispatch.
    pub(crate) on_cpu: Option<ThreadId>,
    /// Process whose address space is installed
    pub(crate) active_space: Option<ProcessId>,
    /// Adopts the children of exiting processes
    pub(crate) reaper: Option<ProcessId>,
    pub(crate) shm: SharedMemoryRegistry,
    pub(crate) metrics: SchedulerMetrics,
    pub(crate) ticks: u64,
    pub(crate) idle_ticks: u64,
    pub(crate) hal: H,
    pub(crate) frames: F,
}

/// Build a scheduler on the software context and frame backends
pub fn scheduler_init(config: SchedConfig) -> KernelResult<Scheduler> {
    Scheduler::with_backends(config, SoftContext::new(), RangeFrameAllocator::default())
}

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Build a scheduler on the given hardware backends
    pub fn with_backends(config: SchedConfig, hal: H, frames: F) -> KernelResult<Self> {
        config.validate()?;

        log::info!(
            "[SCHED] Initializing: {} priorities, {}ms slice, {}ms tick, preemptive={}",
            crate::config::NUM_PRIORITIES,
            config.time_slice_ms,
            config.tick_ms,
            config.preemptive
        );

        Ok(Self {
            config,
            processes: IdTable::new(config.max_processes, "process table"),
            threads: IdTable::new(config.max_threads, "thread table"),
            ready: ReadyQueues::new(),
            blocked: BlockedSet::new(),
            sleeping: SleepQueue::new(),
            zombies: BTreeSet::new(),
            current: None,
            on_cpu: None,
            active_space: None,
            reaper: None,
            shm: SharedMemoryRegistry::new(),
            metrics: SchedulerMetrics::new(),
            ticks: 0,
            idle_ticks: 0,
            hal,
            frames,
        })
    }

    /// Terminate every remaining process, reap them all and hand the
    /// backends back
    pub fn teardown(mut self) -> (H, F) {
        log::info!(
            "[SCHED] Tearing down: {} processes, {} threads",
            self.processes.len(),
            self.threads.len()
        );

        self.reaper = None;
        let kill = WaitStatus::Signaled(Signal::SIGKILL.number() as i32);
        for id in self.processes.ids() {
            let live = self.processes.get(id).is_some_and(|p| !p.is_zombie());
            if live && self.terminate_with(ProcessId(id), kill).is_err() {
                log::warn!("[SCHED] Process {} could not be terminated", id);
            }
        }
        for id in self.processes.ids() {
            self.reap(ProcessId(id));
        }

        (self.hal, self.frames)
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    pub fn frames(&self) -> &F {
        &self.frames
    }

    /// Timer ticks since initialization
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Monotonic time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.ticks * self.config.tick_ms as u64
    }

    /// Currently running (process, thread) pair
    pub fn current(&self) -> Option<(ProcessId, ThreadId)> {
        self.current
    }

    pub fn current_pid(&self) -> Option<ProcessId> {
        self.current.map(|(pid, _)| pid)
    }

    pub fn current_tid(&self) -> Option<ThreadId> {
        self.current.map(|(_, tid)| tid)
    }

    pub fn process(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(pid.0)
    }

    pub fn thread(&self, tid: ThreadId) -> Option<&Thread> {
        self.threads.get(tid.0)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Threads queued at `level`, head first
    pub fn ready_threads_at(&self, level: u8) -> Vec<ThreadId> {
        self.ready.threads_at(level)
    }

    /// Total number of queued threads
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    /// Level a thread is queued at, if it is queued
    pub fn queued_level(&self, tid: ThreadId) -> Option<u8> {
        self.ready.level_of(tid)
    }

    pub fn blocked_reason(&self, tid: ThreadId) -> Option<BlockReason> {
        self.blocked.reason_of(tid)
    }

    pub fn sleep_deadline(&self, tid: ThreadId) -> Option<u64> {
        self.sleeping.deadline_of(tid)
    }

    /// Processes waiting to be reaped
    pub fn zombies(&self) -> Vec<ProcessId> {
        self.zombies.iter().copied().collect()
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.get_summary()
    }

    pub(crate) fn process_ref(&self, pid: ProcessId) -> KernelResult<&Process> {
        self.processes
            .get(pid.0)
            .ok_or(KernelError::ProcessNotFound { pid: pid.0 })
    }

    pub(crate) fn process_mut(&mut self, pid: ProcessId) -> KernelResult<&mut Process> {
        self.processes
            .get_mut(pid.0)
            .ok_or(KernelError::ProcessNotFound { pid: pid.0 })
    }

    pub(crate) fn thread_ref(&self, tid: ThreadId) -> KernelResult<&Thread> {
        self.threads
            .get(tid.0)
            .ok_or(KernelError::ThreadNotFound { tid: tid.0 })
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> KernelResult<&mut Thread> {
        self.threads
            .get_mut(tid.0)
            .ok_or(KernelError::ThreadNotFound { tid: tid.0 })
    }

    /// Live (non-zombie) process lookup
    pub(crate) fn live_process(&self, pid: ProcessId) -> KernelResult<&Process> {
        let process = self.process_ref(pid)?;
        if process.is_zombie() {
            return Err(KernelError::InvalidState {
                expected: "live process",
                actual: "zombie",
            });
        }
        Ok(process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_rejects_invalid_config() {
        let config = SchedConfig::default().with_tick_ms(0);
        assert!(scheduler_init(config).is_err());
    }

    #[test]
    fn test_fresh_scheduler_is_idle() {
        let mut sched = scheduler_init(SchedConfig::default()).unwrap();
        assert_eq!(sched.current(), None);
        assert_eq!(sched.schedule(), None);
        assert_eq!(sched.metrics().idle_percentage, 100);
        sched.assert_consistent();
    }

    #[test]
    fn test_completion_helpers() {
        let done: Completion<u32> = Completion::Done(3);
        assert!(done.is_done());
        assert_eq!(done.map(|v| v * 2).done(), Some(6));
        let suspended: Completion<u32> = Completion::Suspended;
        assert!(suspended.is_suspended());
        assert_eq!(suspended.done(), None);
    }

    #[test]
    fn test_teardown_returns_all_frames() {
        let mut sched = scheduler_init(SchedConfig::default()).unwrap();
        let total = sched.frames().total_count();
        let pid = sched.create("a", 0x1000, 0, 10).unwrap();
        sched.create("b", 0x1000, 0, 10).unwrap();
        sched.schedule();
        sched
            .alloc_memory(pid, 0x3000, crate::mm::MapPermissions::READ_WRITE)
            .unwrap();
        assert!(sched.frames().free_count() < total);

        let (_hal, frames) = sched.teardown();
        assert_eq!(frames.free_count(), total);
    }
}
