//! Process Control Block (PCB) implementation
//!
//! The PCB is the core data structure representing a process in the kernel.
//! It contains all the information needed to manage a process. Scheduling
//! state is derived from the process's threads by the scheduler and cached
//! here; only the scheduler writes it.

use alloc::{string::String, vec::Vec};

use super::{thread::ThreadId, wait::WaitStatus};
use crate::{
    config::MAX_FDS,
    ipc::MessageQueue,
    mm::{MemoryMap, PhysicalAddress},
    sched::BlockReason,
};

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is being created
    Created,
    /// At least one thread is ready and none is running
    Ready,
    /// One of its threads owns the CPU
    Running,
    /// All live threads wait; carries the first blocked thread's reason
    Blocked(BlockReason),
    /// All live threads sleep
    Sleeping,
    /// Process has exited but not yet reaped
    Zombie(WaitStatus),
}

impl ProcessState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Blocked(_) => "blocked",
            Self::Sleeping => "sleeping",
            Self::Zombie(_) => "zombie",
        }
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self, Self::Zombie(_))
    }
}

/// Opaque file handle owned by the filesystem layer
pub type FileHandle = u64;

/// Memory usage statistics (bytes)
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Virtual memory size
    pub virtual_size: u64,
    /// Resident set size
    pub resident_size: u64,
    /// Shared memory size
    pub shared_size: u64,
}

/// Process Control Block
#[derive(Debug)]
pub struct Process {
    /// Process ID
    pub pid: ProcessId,

    /// Parent process ID (None for kernel-created processes and orphans)
    pub parent: Option<ProcessId>,

    /// Process name
    pub name: String,

    /// Process state
    pub(crate) state: ProcessState,

    /// Priority inherited by threads (0 = most urgent)
    pub(crate) priority: u8,

    pub(crate) nice: i8,

    /// Creation timestamp (ms)
    pub created_at: u64,

    /// First dispatch (ms)
    pub started_at: Option<u64>,

    /// CPU time used (ms)
    pub cpu_time: u64,

    /// Last dispatch of any of its threads (ms)
    pub last_scheduled: Option<u64>,

    /// Child processes, oldest first
    pub children: Vec<ProcessId>,

    /// Virtual memory regions
    pub(crate) memory: MemoryMap,

    /// File descriptor table
    pub(crate) fds: [Option<FileHandle>; MAX_FDS],

    /// Threads in this process, creation order
    pub threads: Vec<ThreadId>,

    pub main_thread: Option<ThreadId>,

    /// Incoming messages
    pub(crate) messages: MessageQueue,

    /// Exit status (set when process exits)
    pub exit_status: Option<WaitStatus>,

    pub has_exited: bool,

    /// Stop or continue event not yet reported to `wait`
    pub(crate) unreported_event: Option<WaitStatus>,

    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,

    /// Frame standing for the root of the address space
    pub page_table_root: PhysicalAddress,

    /// Pending signals bitmap, bit n = signal n
    pub(crate) pending_signals: u64,

    /// Memory usage statistics
    pub memory_stats: MemoryStats,
}

impl Process {
    /// Create a new process
    pub fn new(
        pid: ProcessId,
        parent: Option<ProcessId>,
        name: String,
        priority: u8,
        created_at: u64,
        page_table_root: PhysicalAddress,
        queue_capacity: usize,
    ) -> Self {
        Self {
            pid,
            parent,
            name,
            state: ProcessState::Created,
            priority,
            nice: 0,
            created_at,
            started_at: None,
            cpu_time: 0,
            last_scheduled: None,
            children: Vec::new(),
            memory: MemoryMap::new(),
            fds: [None; MAX_FDS],
            threads: Vec::new(),
            main_thread: None,
            messages: MessageQueue::new(queue_capacity),
            exit_status: None,
            has_exited: false,
            unreported_event: None,
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
            page_table_root,
            pending_signals: 0,
            memory_stats: MemoryStats::default(),
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn nice(&self) -> i8 {
        self.nice
    }

    pub fn is_zombie(&self) -> bool {
        self.state.is_zombie()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn memory_map(&self) -> &MemoryMap {
        &self.memory
    }

    pub fn pending_signals(&self) -> u64 {
        self.pending_signals
    }

    pub fn queued_messages(&self) -> usize {
        self.messages.len()
    }

    /// Recompute memory statistics from the region list
    pub(crate) fn refresh_memory_stats(&mut self) {
        self.memory_stats = MemoryStats {
            virtual_size: self.memory.virtual_size(),
            resident_size: self.memory.resident_size(),
            shared_size: self.memory.shared_size(),
        };
    }

    /// Snapshot for callers outside the scheduler
    pub fn info(&self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            parent: self.parent,
            name: self.name.clone(),
            state: self.state,
            priority: self.priority,
            nice: self.nice,
            thread_count: self.threads.len(),
            children: self.children.len(),
            cpu_time: self.cpu_time,
            created_at: self.created_at,
            started_at: self.started_at,
            last_scheduled: self.last_scheduled,
            memory: self.memory_stats,
            queued_messages: self.messages.len(),
            exit_status: self.exit_status,
            uid: self.uid,
            gid: self.gid,
        }
    }
}

/// Point-in-time copy of a process's externally visible fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: ProcessId,
    pub parent: Option<ProcessId>,
    pub name: String,
    pub state: ProcessState,
    pub priority: u8,
    pub nice: i8,
    pub thread_count: usize,
    pub children: usize,
    /// CPU time used (ms)
    pub cpu_time: u64,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub last_scheduled: Option<u64>,
    pub memory: MemoryStats,
    pub queued_messages: usize,
    pub exit_status: Option<WaitStatus>,
    pub uid: u32,
    pub gid: u32,
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;

    fn make_process(pid: u64, name: &str) -> Process {
        Process::new(
            ProcessId(pid),
            None,
            name.to_string(),
            20,
            0,
            PhysicalAddress::new(0x1000),
            4,
        )
    }

    #[test]
    fn test_initial_state_is_created() {
        let process = make_process(1, "test");
        assert_eq!(process.state(), ProcessState::Created);
        assert!(!process.is_zombie());
        assert_eq!(process.thread_count(), 0);
        assert!(process.fds.iter().all(Option::is_none));
    }

    #[test]
    fn test_info_snapshot() {
        let process = make_process(7, "shell");
        let info = process.info();
        assert_eq!(info.pid, ProcessId(7));
        assert_eq!(info.name, "shell");
        assert_eq!(info.priority, 20);
        assert_eq!(info.parent, None);
    }

    #[test]
    fn test_process_id_display() {
        assert_eq!(ProcessId(42).to_string(), "42");
    }

    #[test]
    fn test_zombie_state_name() {
        let state = ProcessState::Zombie(WaitStatus::Exited(0));
        assert!(state.is_zombie());
        assert_eq!(state.name(), "zombie");
    }
}
