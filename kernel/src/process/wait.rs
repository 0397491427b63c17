//! Process Wait Infrastructure
//!
//! Provides `waitpid`-style semantics for parent processes to wait on
//! children. A parent that finds nothing to collect blocks with reason
//! `WaitChild`; an exiting, stopping or continuing child wakes it and the
//! call is restarted.

use alloc::{vec, vec::Vec};

use super::ProcessId;
use crate::{
    arch::ContextHal,
    error::{IpcError, KernelError, KernelResult, SchedError},
    mm::FrameAllocator,
    sched::{BlockReason, Completion, Scheduler},
};

// ---------------------------------------------------------------------------
// Wait Options
// ---------------------------------------------------------------------------

/// Options controlling `wait` behavior, modeled after POSIX flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaitOptions {
    flags: u32,
}

impl WaitOptions {
    /// Do not block if no child has changed state.
    pub const WNOHANG: u32 = 1;
    /// Also return if a child has stopped (SIGSTOP).
    pub const WUNTRACED: u32 = 2;
    /// Also return if a stopped child has been resumed by SIGCONT.
    pub const WCONTINUED: u32 = 8;

    /// Create options from raw flags.
    pub fn from_flags(flags: u32) -> Self {
        Self { flags }
    }

    pub fn nohang() -> Self {
        Self::from_flags(Self::WNOHANG)
    }

    pub fn is_nohang(&self) -> bool {
        self.flags & Self::WNOHANG != 0
    }

    pub fn is_untraced(&self) -> bool {
        self.flags & Self::WUNTRACED != 0
    }

    pub fn is_continued(&self) -> bool {
        self.flags & Self::WCONTINUED != 0
    }
}

// ---------------------------------------------------------------------------
// Wait Status
// ---------------------------------------------------------------------------

/// How a child changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Child exited normally with the given status code.
    Exited(i32),
    /// Child was terminated by a signal.
    Signaled(i32),
    /// Child was stopped by a signal (only with WUNTRACED).
    Stopped(i32),
    /// Child was resumed by SIGCONT (only with WCONTINUED).
    Continued,
}

impl WaitStatus {
    /// Encode the status as a raw `i32` matching POSIX `wstatus` layout.
    ///
    /// - Exited: `(code & 0xFF) << 8`
    /// - Signaled: `signum & 0x7F`
    /// - Stopped: `0x7F | (signum << 8)`
    /// - Continued: `0xFFFF`
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Exited(code) => (code & 0xFF) << 8,
            Self::Signaled(sig) => sig & 0x7F,
            Self::Stopped(sig) => 0x7F | (sig << 8),
            Self::Continued => 0xFFFF_u16 as i32,
        }
    }

    /// True for the statuses that end a process
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exited(_) | Self::Signaled(_))
    }
}

// ---------------------------------------------------------------------------
// Wait operations
// ---------------------------------------------------------------------------

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Collect a state change of a child of `parent` without blocking.
    ///
    /// `target` of `None` matches any child. A zombie child is reaped and
    /// its exit status returned. Stop and continue events are reported only
    /// when requested through `options`. `Ok(None)` means the children exist
    /// but none has anything to report.
    pub fn try_wait(
        &mut self,
        parent: ProcessId,
        target: Option<ProcessId>,
        options: WaitOptions,
    ) -> KernelResult<Option<(ProcessId, WaitStatus)>> {
        let process = self.process_ref(parent)?;
        let candidates: Vec<ProcessId> = match target {
            Some(child) if process.children.contains(&child) => vec![child],
            Some(child) => return Err(KernelError::NoSuchChild { pid: child.0 }),
            None if process.children.is_empty() => {
                return Err(KernelError::NoSuchChild { pid: 0 })
            }
            None => process.children.clone(),
        };

        let zombie = candidates
            .iter()
            .copied()
            .find(|&child| self.processes.get(child.0).is_some_and(|p| p.is_zombie()));
        if let Some(child) = zombie {
            if let Some(reaped) = self.reap(child) {
                self.check_invariants();
                return Ok(Some(reaped));
            }
        }

        for child in candidates {
            let Some(process) = self.processes.get_mut(child.0) else {
                continue;
            };
            let wanted = match process.unreported_event {
                Some(WaitStatus::Stopped(_)) => options.is_untraced(),
                Some(WaitStatus::Continued) => options.is_continued(),
                _ => false,
            };
            if wanted {
                if let Some(event) = process.unreported_event.take() {
                    log::debug!("[PROCESS] Reporting {:?} of {} to {}", event, child, parent);
                    return Ok(Some((child, event)));
                }
            }
        }

        Ok(None)
    }

    /// Wait for a child of the running process to change state.
    ///
    /// Blocks the caller with reason `WaitChild` when nothing is ready and
    /// `WNOHANG` is not set; the caller restarts the call once woken.
    pub fn wait(
        &mut self,
        target: Option<ProcessId>,
        options: WaitOptions,
    ) -> KernelResult<Completion<(ProcessId, WaitStatus)>> {
        let (pid, tid) = self.current.ok_or(SchedError::NoCurrentThread)?;

        if let Some(reaped) = self.try_wait(pid, target, options)? {
            return Ok(Completion::Done(reaped));
        }
        if options.is_nohang() {
            return Err(IpcError::WouldBlock.into());
        }

        self.suspend_thread(tid, BlockReason::WaitChild)?;
        log::debug!("[PROCESS] Process {} waiting for {:?}", pid, target);
        self.reschedule(true);
        self.check_invariants();
        Ok(Completion::Suspended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_options_flags() {
        let options = WaitOptions::from_flags(WaitOptions::WNOHANG | WaitOptions::WCONTINUED);
        assert!(options.is_nohang());
        assert!(!options.is_untraced());
        assert!(options.is_continued());
        assert!(!WaitOptions::default().is_nohang());
    }

    #[test]
    fn test_raw_status_encoding() {
        assert_eq!(WaitStatus::Exited(7).to_raw(), 7 << 8);
        assert_eq!(WaitStatus::Signaled(9).to_raw(), 9);
        assert_eq!(WaitStatus::Stopped(19).to_raw(), 0x7F | (19 << 8));
        assert_eq!(WaitStatus::Continued.to_raw(), 0xFFFF);
        assert!(WaitStatus::Signaled(9).is_terminal());
        assert!(!WaitStatus::Continued.is_terminal());
    }
}
