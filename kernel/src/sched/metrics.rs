//! Scheduler counters
//!
//! Counters are atomics so they can be recorded and read through a shared
//! reference, matching how statistics snapshots borrow the scheduler.

use core::sync::atomic::{AtomicU64, Ordering};

/// Scheduler performance metrics
#[derive(Debug)]
pub struct SchedulerMetrics {
    /// Total number of context switches
    pub context_switches: AtomicU64,
    /// Number of voluntary context switches (yield, sleep, block, exit)
    pub voluntary_switches: AtomicU64,
    /// Number of involuntary context switches (preemption)
    pub involuntary_switches: AtomicU64,
    /// Number of scheduling decisions made
    pub schedule_calls: AtomicU64,
    /// Scheduling decisions that found nothing runnable
    pub idle_scheduled: AtomicU64,
    /// Preemptions issued from the timer tick
    pub preemptions: AtomicU64,
    /// Single-level boosts applied by aging
    pub aging_boosts: AtomicU64,
    /// IPC blocks
    pub ipc_blocks: AtomicU64,
    /// IPC wakeups
    pub ipc_wakeups: AtomicU64,
    /// Signals acted on or consumed
    pub signals_delivered: AtomicU64,
}

impl SchedulerMetrics {
    /// Create new metrics instance
    pub const fn new() -> Self {
        Self {
            context_switches: AtomicU64::new(0),
            voluntary_switches: AtomicU64::new(0),
            involuntary_switches: AtomicU64::new(0),
            schedule_calls: AtomicU64::new(0),
            idle_scheduled: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
            aging_boosts: AtomicU64::new(0),
            ipc_blocks: AtomicU64::new(0),
            ipc_wakeups: AtomicU64::new(0),
            signals_delivered: AtomicU64::new(0),
        }
    }

    /// Record a context switch
    pub fn record_context_switch(&self, voluntary: Option<bool>) {
        self.context_switches.fetch_add(1, Ordering::Relaxed);

        match voluntary {
            Some(true) => {
                self.voluntary_switches.fetch_add(1, Ordering::Relaxed);
            }
            Some(false) => {
                self.involuntary_switches.fetch_add(1, Ordering::Relaxed);
            }
            // Switch out of an idle CPU
            None => {}
        }
    }

    pub fn record_schedule_call(&self) {
        self.schedule_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record idle decision
    pub fn record_idle_scheduled(&self) {
        self.idle_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aging_boost(&self) {
        self.aging_boosts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record IPC block
    pub fn record_ipc_block(&self) {
        self.ipc_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record IPC wakeup
    pub fn record_ipc_wakeup(&self) {
        self.ipc_wakeups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal(&self) {
        self.signals_delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Get summary of metrics
    pub fn get_summary(&self) -> MetricsSummary {
        let schedule_calls = self.schedule_calls.load(Ordering::Relaxed);

        MetricsSummary {
            context_switches: self.context_switches.load(Ordering::Relaxed),
            voluntary_switches: self.voluntary_switches.load(Ordering::Relaxed),
            involuntary_switches: self.involuntary_switches.load(Ordering::Relaxed),
            schedule_calls,
            idle_percentage: if schedule_calls > 0 {
                (self.idle_scheduled.load(Ordering::Relaxed) * 100) / schedule_calls
            } else {
                0
            },
            preemptions: self.preemptions.load(Ordering::Relaxed),
            aging_boosts: self.aging_boosts.load(Ordering::Relaxed),
            ipc_blocks: self.ipc_blocks.load(Ordering::Relaxed),
            ipc_wakeups: self.ipc_wakeups.load(Ordering::Relaxed),
            signals_delivered: self.signals_delivered.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.context_switches.store(0, Ordering::Relaxed);
        self.voluntary_switches.store(0, Ordering::Relaxed);
        self.involuntary_switches.store(0, Ordering::Relaxed);
        self.schedule_calls.store(0, Ordering::Relaxed);
        self.idle_scheduled.store(0, Ordering::Relaxed);
        self.preemptions.store(0, Ordering::Relaxed);
        self.aging_boosts.store(0, Ordering::Relaxed);
        self.ipc_blocks.store(0, Ordering::Relaxed);
        self.ipc_wakeups.store(0, Ordering::Relaxed);
        self.signals_delivered.store(0, Ordering::Relaxed);
    }
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of scheduler metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSummary {
    pub context_switches: u64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
    pub schedule_calls: u64,
    pub idle_percentage: u64,
    pub preemptions: u64,
    pub aging_boosts: u64,
    pub ipc_blocks: u64,
    pub ipc_wakeups: u64,
    pub signals_delivered: u64,
}
