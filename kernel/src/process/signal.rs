//! Signals
//!
//! Termination-class signals end the target at once. SIGSTOP and SIGCONT
//! drive the stopped state. Everything else is recorded in the pending
//! bitmap and consumed when a thread of the target is next dispatched;
//! user-space handlers are not run.

use alloc::vec::Vec;
use core::fmt;

use super::{ProcessId, ThreadState, WaitStatus};
use crate::{
    arch::ContextHal,
    error::{KernelError, KernelResult},
    mm::FrameAllocator,
    sched::{BlockReason, Scheduler},
};

/// Signal number (1..=63)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signal(pub u8);

impl Signal {
    pub const SIGHUP: Self = Self(1);
    pub const SIGINT: Self = Self(2);
    pub const SIGQUIT: Self = Self(3);
    pub const SIGILL: Self = Self(4);
    pub const SIGTRAP: Self = Self(5);
    pub const SIGABRT: Self = Self(6);
    pub const SIGBUS: Self = Self(7);
    pub const SIGFPE: Self = Self(8);
    pub const SIGKILL: Self = Self(9);
    pub const SIGUSR1: Self = Self(10);
    pub const SIGSEGV: Self = Self(11);
    pub const SIGUSR2: Self = Self(12);
    pub const SIGPIPE: Self = Self(13);
    pub const SIGALRM: Self = Self(14);
    pub const SIGTERM: Self = Self(15);
    pub const SIGCHLD: Self = Self(17);
    pub const SIGCONT: Self = Self(18);
    pub const SIGSTOP: Self = Self(19);
    pub const SIGTSTP: Self = Self(20);

    /// Highest valid signal number
    pub const MAX: u8 = 63;

    pub fn new(number: u8) -> Option<Self> {
        (1..=Self::MAX).contains(&number).then_some(Self(number))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Bit of this signal in a pending bitmap
    pub fn mask(self) -> u64 {
        1 << self.0
    }

    /// Signals whose default action ends the process
    pub fn is_termination(self) -> bool {
        matches!(
            self,
            Self::SIGHUP
                | Self::SIGINT
                | Self::SIGQUIT
                | Self::SIGABRT
                | Self::SIGKILL
                | Self::SIGTERM
        )
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::SIGHUP => "SIGHUP",
            Self::SIGINT => "SIGINT",
            Self::SIGQUIT => "SIGQUIT",
            Self::SIGKILL => "SIGKILL",
            Self::SIGTERM => "SIGTERM",
            Self::SIGABRT => "SIGABRT",
            Self::SIGCONT => "SIGCONT",
            Self::SIGSTOP => "SIGSTOP",
            _ => return write!(f, "signal {}", self.0),
        };
        f.write_str(name)
    }
}

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Send `signal` to `pid`
    pub fn kill(&mut self, pid: ProcessId, signal: u8) -> KernelResult<()> {
        let signal = Signal::new(signal).ok_or(KernelError::InvalidArgument {
            name: "signal",
            value: "must be in 1..=63",
        })?;
        let process = self.process_ref(pid)?;
        if process.is_zombie() {
            log::debug!("[PROCESS] {} to zombie {} ignored", signal, pid);
            return Ok(());
        }

        log::debug!("[PROCESS] Sending {} to process {}", signal, pid);
        if signal.is_termination() {
            self.terminate_with(pid, WaitStatus::Signaled(signal.number() as i32))?;
            self.metrics.record_signal();
        } else if signal == Signal::SIGCONT {
            self.continue_process(pid)?;
        } else if signal == Signal::SIGSTOP {
            self.process_mut(pid)?.pending_signals |= signal.mask();
            if self.current_pid() != Some(pid) {
                self.stop_process(pid)?;
            }
        } else {
            self.process_mut(pid)?.pending_signals |= signal.mask();
        }

        self.check_invariants();
        Ok(())
    }

    /// Stop every ready or running thread of `pid`
    pub(crate) fn stop_process(&mut self, pid: ProcessId) -> KernelResult<()> {
        let process = self.process_mut(pid)?;
        process.pending_signals &= !Signal::SIGSTOP.mask();
        let runnable: Vec<_> = process.threads.clone();

        let mut stopped = 0;
        for tid in runnable {
            if self.threads.get(tid.0).is_some_and(|t| t.is_runnable()) {
                self.suspend_thread(tid, BlockReason::Stopped)?;
                stopped += 1;
            }
        }

        self.process_mut(pid)?.unreported_event = Some(WaitStatus::Stopped(
            Signal::SIGSTOP.number() as i32,
        ));
        self.metrics.record_signal();
        self.notify_parent(pid);
        log::info!("[PROCESS] Process {} stopped ({} threads)", pid, stopped);
        Ok(())
    }

    /// Resume a stopped process
    fn continue_process(&mut self, pid: ProcessId) -> KernelResult<()> {
        let process = self.process_mut(pid)?;
        process.pending_signals &= !Signal::SIGSTOP.mask();
        let threads: Vec<_> = process.threads.clone();

        let mut resumed = 0;
        for tid in threads {
            let stopped = self
                .threads
                .get(tid.0)
                .is_some_and(|t| t.state() == ThreadState::Blocked(BlockReason::Stopped));
            if stopped {
                self.add_ready(tid);
                resumed += 1;
            }
        }

        self.process_mut(pid)?.unreported_event = Some(WaitStatus::Continued);
        self.metrics.record_signal();
        self.notify_parent(pid);
        log::info!("[PROCESS] Process {} continued ({} threads)", pid, resumed);
        Ok(())
    }

    /// Apply a pending SIGSTOP before `pid` is dispatched. Returns true when
    /// the process was stopped.
    pub(crate) fn take_pending_stop(&mut self, pid: ProcessId) -> bool {
        let pending = self
            .processes
            .get(pid.0)
            .is_some_and(|p| p.pending_signals & Signal::SIGSTOP.mask() != 0);
        if !pending {
            return false;
        }
        if self.stop_process(pid).is_err() {
            log::warn!("[PROCESS] Pending stop of process {} failed", pid);
            if let Some(process) = self.processes.get_mut(pid.0) {
                process.pending_signals &= !Signal::SIGSTOP.mask();
            }
            return false;
        }
        true
    }

    /// Consume the non-stop signals pending on `pid`
    pub(crate) fn consume_pending_signals(&mut self, pid: ProcessId) {
        let Some(process) = self.processes.get_mut(pid.0) else {
            return;
        };
        let pending = process.pending_signals & !Signal::SIGSTOP.mask();
        if pending == 0 {
            return;
        }
        process.pending_signals &= Signal::SIGSTOP.mask();
        for _ in 0..pending.count_ones() {
            self.metrics.record_signal();
        }
        log::debug!(
            "[PROCESS] Consumed signals {:#x} of process {}",
            pending,
            pid
        );
    }

    /// Wake a parent blocked in `wait` after a child changed state
    pub(crate) fn notify_parent(&mut self, child: ProcessId) {
        let parent = self.processes.get(child.0).and_then(|p| p.parent);
        if let Some(parent) = parent {
            let woken = self.wake_process_waiters(parent, BlockReason::WaitChild);
            if woken > 0 {
                log::debug!("[PROCESS] Woke {} waiter(s) of parent {}", woken, parent);
            }
        }
    }
}
