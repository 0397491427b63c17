//! Common test utilities and helpers for TBOS scheduling core tests

#![allow(dead_code)]

use tbos_kernel::{scheduler_init, ProcessId, SchedConfig, Scheduler, ThreadId};

/// Entry point handed to every test process
pub const ENTRY: usize = 0x40_1000;

/// Scheduler with the default configuration
pub fn scheduler() -> Scheduler {
    scheduler_with(SchedConfig::default())
}

pub fn scheduler_with(config: SchedConfig) -> Scheduler {
    scheduler_init(config).expect("test configuration is valid")
}

/// Scheduler with a running `init` process at priority 0.
///
/// Processes created afterwards are children of `init`, so they stay
/// zombies until waited for.
pub fn with_init(config: SchedConfig) -> (Scheduler, ProcessId) {
    let mut sched = scheduler_with(config);
    let init = sched
        .create("init", ENTRY, 0, 0)
        .expect("init process is created");
    assert_eq!(sched.schedule().map(|(pid, _)| pid), Some(init));
    (sched, init)
}

/// Main thread of `pid`
pub fn main_thread(sched: &Scheduler, pid: ProcessId) -> ThreadId {
    sched
        .process(pid)
        .and_then(|p| p.main_thread)
        .expect("process has a main thread")
}

/// Run `ticks` timer interrupts, recording the running pid after each
pub fn run_ticks(sched: &mut Scheduler, ticks: usize) -> Vec<Option<ProcessId>> {
    (0..ticks)
        .map(|_| {
            sched.timer_interrupt();
            sched.current_pid()
        })
        .collect()
}
