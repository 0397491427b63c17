//! Error types for the TBOS scheduling core
//!
//! Every recoverable failure is reported through [`KernelError`]. Scheduler
//! defects (queue membership violations) are not errors: they panic with a
//! diagnostic from [`crate::sched::Scheduler::assert_consistent`].

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Process-related errors
    ProcessNotFound {
        pid: u64,
    },
    ThreadNotFound {
        tid: u64,
    },
    NoSuchChild {
        pid: u64,
    },
    NameTooLong {
        len: usize,
        max: usize,
    },
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Scheduler-related errors
    SchedulerError(SchedError),

    /// IPC-related errors
    IpcError(IpcError),

    /// Memory map errors
    MemoryError(MemError),

    /// Generic errors
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    ResourceExhausted {
        resource: &'static str,
    },
    NotInitialized {
        subsystem: &'static str,
    },
}

/// Scheduler-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    InvalidPriority { priority: u8 },
    InvalidNice { nice: i8 },
    NoCurrentThread,
}

/// IPC-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    MessageTooLarge { size: usize, max: usize },
    QueueFull { capacity: usize },
    RegionNotFound { id: u64 },
    WouldBlock,
}

/// Memory map errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// No free virtual range of the requested size
    OutOfSpace { size: usize },
    /// Physical allocator could not supply frames
    OutOfMemory { frames: usize },
    /// New mapping intersects an existing one
    Overlap { addr: u64, size: usize },
    /// No mapping matches the given range exactly
    RegionMismatch { addr: u64, size: usize },
    /// Address is not page aligned
    Unaligned { addr: u64 },
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// True for the non-blocking "try again later" outcome
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::IpcError(IpcError::WouldBlock))
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProcessNotFound { pid } => write!(f, "Process {} not found", pid),
            Self::ThreadNotFound { tid } => write!(f, "Thread {} not found", tid),
            Self::NoSuchChild { pid } => {
                if *pid == 0 {
                    write!(f, "No child process to wait for")
                } else {
                    write!(f, "Process {} is not a child of the caller", pid)
                }
            }
            Self::NameTooLong { len, max } => {
                write!(f, "Name too long: {} bytes, at most {} allowed", len, max)
            }
            Self::InvalidState { expected, actual } => {
                write!(f, "Invalid state: expected {}, got {}", expected, actual)
            }
            Self::SchedulerError(e) => write!(f, "Scheduler error: {}", e),
            Self::IpcError(e) => write!(f, "IPC error: {}", e),
            Self::MemoryError(e) => write!(f, "Memory error: {}", e),
            Self::InvalidArgument { name, value } => {
                write!(f, "Invalid argument '{}': {}", name, value)
            }
            Self::ResourceExhausted { resource } => write!(f, "Resource exhausted: {}", resource),
            Self::NotInitialized { subsystem } => write!(f, "{} not initialized", subsystem),
        }
    }
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPriority { priority } => write!(f, "invalid priority {}", priority),
            Self::InvalidNice { nice } => write!(f, "invalid nice value {}", nice),
            Self::NoCurrentThread => write!(f, "no thread is running"),
        }
    }
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MessageTooLarge { size, max } => {
                write!(f, "message of {} bytes exceeds limit of {}", size, max)
            }
            Self::QueueFull { capacity } => write!(f, "queue full ({} messages)", capacity),
            Self::RegionNotFound { id } => write!(f, "shared region {} not found", id),
            Self::WouldBlock => write!(f, "operation would block"),
        }
    }
}

impl fmt::Display for MemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfSpace { size } => write!(f, "no free virtual range of {} bytes", size),
            Self::OutOfMemory { frames } => write!(f, "cannot allocate {} frames", frames),
            Self::Overlap { addr, size } => {
                write!(f, "range 0x{:x}+0x{:x} overlaps an existing mapping", addr, size)
            }
            Self::RegionMismatch { addr, size } => {
                write!(f, "no mapping matches 0x{:x}+0x{:x} exactly", addr, size)
            }
            Self::Unaligned { addr } => write!(f, "address 0x{:x} is not page aligned", addr),
        }
    }
}

// Conversion implementations
impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedulerError(err)
    }
}

impl From<IpcError> for KernelError {
    fn from(err: IpcError) -> Self {
        Self::IpcError(err)
    }
}

impl From<MemError> for KernelError {
    fn from(err: MemError) -> Self {
        Self::MemoryError(err)
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use super::*;

    #[test]
    fn test_sub_errors_convert() {
        let err: KernelError = MemError::Overlap {
            addr: 0x1000,
            size: 0x2000,
        }
        .into();
        assert!(matches!(err, KernelError::MemoryError(MemError::Overlap { .. })));

        let err: KernelError = IpcError::WouldBlock.into();
        assert!(err.is_would_block());
    }

    #[test]
    fn test_display_messages() {
        let err = KernelError::ProcessNotFound { pid: 42 };
        assert_eq!(err.to_string(), "Process 42 not found");

        let err: KernelError = IpcError::MessageTooLarge { size: 32, max: 16 }.into();
        assert_eq!(
            err.to_string(),
            "IPC error: message of 32 bytes exceeds limit of 16"
        );
    }
}
