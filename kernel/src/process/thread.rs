//! Thread control block
//!
//! Threads are the unit the scheduler queues and dispatches. Their state is a
//! tagged enum, and every change goes through [`Thread::set_state`], which
//! rejects transitions the state machine does not allow.

use super::ProcessId;
use crate::{arch::CpuContext, mm::VirtualAddress, sched::BlockReason};

/// Thread ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl core::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Queued on the ready queue of its effective priority
    Ready,
    /// Owns the CPU
    Running,
    /// Waiting for an external event
    Blocked(BlockReason),
    /// Waiting for the tick at which `now >= wake_at` (ms)
    Sleeping { wake_at: u64 },
    /// Exited; the TCB is reclaimed right after this transition
    Terminated,
}

impl ThreadState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Blocked(_) => "blocked",
            Self::Sleeping { .. } => "sleeping",
            Self::Terminated => "terminated",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: &ThreadState) -> bool {
        use ThreadState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Ready, Running) | (Ready, Blocked(_)) => true,
            (Running, Ready) | (Running, Blocked(_)) | (Running, Sleeping { .. }) => true,
            (Blocked(_), Ready) | (Sleeping { .. }, Ready) => true,
            _ => false,
        }
    }
}

/// Stack information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    /// Base address (lowest address)
    pub base: VirtualAddress,
    /// Size in bytes
    pub size: usize,
}

impl Stack {
    pub fn new(base: VirtualAddress, size: usize) -> Self {
        Self { base, size }
    }

    /// Get stack top (highest address)
    pub fn top(&self) -> usize {
        self.base.as_u64() as usize + self.size
    }

    /// Check if address is within stack bounds
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base.as_u64() as usize && addr < self.top()
    }
}

/// Thread control block
#[derive(Debug)]
pub struct Thread {
    /// Thread ID
    pub tid: ThreadId,

    /// Owning process ID
    pub process: ProcessId,

    /// Thread state
    state: ThreadState,

    /// Saved CPU context
    pub context: CpuContext,

    /// Stack region, a `Stack` mapping in the owner's memory map
    pub stack: Stack,

    /// Priority before aging (0 = most urgent)
    pub(crate) base_priority: u8,

    /// Levels gained through aging since the last dispatch
    pub(crate) boost: u8,

    /// Set once the priority was chosen for this thread specifically,
    /// detaching it from later process priority changes
    pub(crate) explicit_priority: bool,

    /// Ticks left in the current time slice
    pub(crate) slice_remaining: u32,

    /// Tick at which the thread last entered (or moved within) a ready queue
    pub(crate) ready_since: u64,

    /// Total CPU time used (ms)
    pub cpu_time: u64,

    /// Time of the last dispatch (ms)
    pub last_scheduled: Option<u64>,

    pub voluntary_switches: u64,
    pub involuntary_switches: u64,

    /// Target of a parked send that died before taking the message
    pub(crate) failed_send: Option<ProcessId>,
}

impl Thread {
    /// Create a thread in the READY state
    pub fn new(
        tid: ThreadId,
        process: ProcessId,
        context: CpuContext,
        stack: Stack,
        priority: u8,
    ) -> Self {
        Self {
            tid,
            process,
            state: ThreadState::Ready,
            context,
            stack,
            base_priority: priority,
            boost: 0,
            explicit_priority: false,
            slice_remaining: 0,
            ready_since: 0,
            cpu_time: 0,
            last_scheduled: None,
            voluntary_switches: 0,
            involuntary_switches: 0,
            failed_send: None,
        }
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Move to `next`.
    ///
    /// An illegal transition means scheduler bookkeeping is corrupt, so it
    /// halts rather than continuing with an unknown queue membership.
    pub(crate) fn set_state(&mut self, next: ThreadState) {
        if !self.state.can_transition_to(&next) {
            panic!(
                "[SCHED] invariant violated: thread {} cannot go from {:?} to {:?}",
                self.tid, self.state, next
            );
        }
        self.state = next;
    }

    /// Priority the thread is currently queued at
    pub fn effective_priority(&self) -> u8 {
        self.base_priority.saturating_sub(self.boost)
    }

    pub fn base_priority(&self) -> u8 {
        self.base_priority
    }

    pub fn boost(&self) -> u8 {
        self.boost
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ThreadState::Ready | ThreadState::Running)
    }
}
