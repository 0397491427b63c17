//! Scheduler configuration and compile-time limits

use crate::error::{KernelError, KernelResult};

/// Number of priority levels (0 = most urgent, 39 = least)
pub const NUM_PRIORITIES: usize = 40;

/// Lowest-urgency priority value
pub const MAX_PRIORITY: u8 = (NUM_PRIORITIES - 1) as u8;

/// Priority for processes created with nice 0
pub const DEFAULT_PRIORITY: u8 = 20;

/// Maximum number of live processes, zombies included.
///
/// Zombies hold their slot until reaped, so a parent that never waits
/// eventually exhausts the table.
pub const TBOS_MAX_PROCESSES: usize = 64;

/// Maximum number of live threads across all processes
pub const TBOS_MAX_THREADS: usize = 256;

/// Maximum process name length in bytes
pub const MAX_NAME_LEN: usize = 32;

/// File descriptor slots per process
pub const MAX_FDS: usize = 16;

/// Default stack size for main and secondary threads
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Lowest user virtual address handed out by `alloc_memory`
pub const USER_SPACE_BASE: u64 = 0x0040_0000;

/// End (exclusive) of the user virtual window
pub const USER_SPACE_END: u64 = 0x8000_0000;

/// Nice range, POSIX style
pub const MIN_NICE: i8 = -20;
pub const MAX_NICE: i8 = 19;

/// Runtime-tunable scheduler parameters.
///
/// Built with [`SchedConfig::default`] and adjusted through the `with_*`
/// setters; [`crate::sched::scheduler_init`] validates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Time slice per dispatch
    pub time_slice_ms: u32,
    /// Timer period
    pub tick_ms: u32,
    /// Aging threshold in time slices; 0 disables aging
    pub aging_factor: u32,
    /// Preempt on slice expiry and on more urgent arrivals
    pub preemptive: bool,
    pub max_processes: usize,
    pub max_threads: usize,
    /// Messages a process queue holds before senders block
    pub message_queue_capacity: usize,
    pub max_message_size: usize,
    pub default_stack_size: usize,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            time_slice_ms: 50,
            tick_ms: 10,
            aging_factor: 4,
            preemptive: true,
            max_processes: TBOS_MAX_PROCESSES,
            max_threads: TBOS_MAX_THREADS,
            message_queue_capacity: 16,
            max_message_size: 4096,
            default_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl SchedConfig {
    /// Configuration with the given slice and preemption flag
    pub fn new(time_slice_ms: u32, preemptive: bool) -> Self {
        Self {
            time_slice_ms,
            preemptive,
            ..Default::default()
        }
    }

    pub fn with_tick_ms(mut self, tick_ms: u32) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    pub fn with_aging_factor(mut self, aging_factor: u32) -> Self {
        self.aging_factor = aging_factor;
        self
    }

    pub fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }

    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_message_queue_capacity(mut self, capacity: usize) -> Self {
        self.message_queue_capacity = capacity;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_default_stack_size(mut self, size: usize) -> Self {
        self.default_stack_size = size;
        self
    }

    /// Time slice expressed in timer ticks, never less than one
    pub fn slice_ticks(&self) -> u32 {
        (self.time_slice_ms / self.tick_ms.max(1)).max(1)
    }

    /// Ticks a ready entry may wait at one level before it is boosted
    pub fn aging_threshold_ticks(&self) -> Option<u64> {
        if self.aging_factor == 0 {
            None
        } else {
            Some(self.aging_factor as u64 * self.slice_ticks() as u64)
        }
    }

    /// Reject configurations the scheduler cannot run with
    pub fn validate(&self) -> KernelResult<()> {
        if self.tick_ms == 0 {
            return Err(KernelError::InvalidArgument {
                name: "tick_ms",
                value: "must be non-zero",
            });
        }
        if self.time_slice_ms == 0 {
            return Err(KernelError::InvalidArgument {
                name: "time_slice_ms",
                value: "must be non-zero",
            });
        }
        if self.max_processes == 0 || self.max_threads < self.max_processes {
            return Err(KernelError::InvalidArgument {
                name: "max_threads",
                value: "must allow one thread per process",
            });
        }
        if self.message_queue_capacity == 0 {
            return Err(KernelError::InvalidArgument {
                name: "message_queue_capacity",
                value: "must be non-zero",
            });
        }
        if self.default_stack_size == 0 {
            return Err(KernelError::InvalidArgument {
                name: "default_stack_size",
                value: "must be non-zero",
            });
        }
        Ok(())
    }
}
