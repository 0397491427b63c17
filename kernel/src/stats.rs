//! Scheduler and memory statistics
//!
//! Read-only snapshots aggregated from the scheduler's tables and counters.

use crate::{
    arch::ContextHal,
    error::KernelResult,
    mm::FrameAllocator,
    process::{ProcessId, ProcessState},
    sched::Scheduler,
};

/// System-wide scheduling statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub total_processes: usize,
    pub running_processes: usize,
    pub ready_processes: usize,
    pub blocked_processes: usize,
    pub sleeping_processes: usize,
    pub zombie_processes: usize,
    pub total_threads: usize,
    pub ready_threads: usize,
    pub context_switches: u64,
    pub voluntary_switches: u64,
    pub involuntary_switches: u64,
    pub schedule_calls: u64,
    pub preemptions: u64,
    pub ticks: u64,
    pub idle_ticks: u64,
    pub uptime_ms: u64,
    pub signals_delivered: u64,
    pub ipc_blocks: u64,
    pub ipc_wakeups: u64,
    /// Messages queued across all processes
    pub queued_messages: usize,
}

/// Physical and virtual memory usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub total_frames: usize,
    pub free_frames: usize,
    pub used_frames: usize,
    /// Sum of all mapping sizes
    pub virtual_bytes: u64,
    /// Bytes backed by allocated frames
    pub resident_bytes: u64,
    /// Bytes mapped from shared regions
    pub shared_bytes: u64,
    pub shared_regions: usize,
}

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Snapshot the scheduler counters and process census
    pub fn get_stats(&self) -> SchedulerStats {
        let metrics = self.metrics.get_summary();
        let mut stats = SchedulerStats {
            total_processes: self.processes.len(),
            total_threads: self.threads.len(),
            ready_threads: self.ready.len(),
            context_switches: metrics.context_switches,
            voluntary_switches: metrics.voluntary_switches,
            involuntary_switches: metrics.involuntary_switches,
            schedule_calls: metrics.schedule_calls,
            preemptions: metrics.preemptions,
            ticks: self.ticks,
            idle_ticks: self.idle_ticks,
            uptime_ms: self.now_ms(),
            signals_delivered: metrics.signals_delivered,
            ipc_blocks: metrics.ipc_blocks,
            ipc_wakeups: metrics.ipc_wakeups,
            ..Default::default()
        };

        for (_, process) in self.processes.iter() {
            match process.state() {
                ProcessState::Running => stats.running_processes += 1,
                ProcessState::Ready | ProcessState::Created => stats.ready_processes += 1,
                ProcessState::Blocked(_) => stats.blocked_processes += 1,
                ProcessState::Sleeping => stats.sleeping_processes += 1,
                ProcessState::Zombie(_) => stats.zombie_processes += 1,
            }
            stats.queued_messages += process.queued_messages();
        }
        stats
    }

    /// Percentage of ticks spent running a thread
    pub fn get_cpu_usage(&self) -> u32 {
        if self.ticks == 0 {
            return 0;
        }
        ((self.ticks - self.idle_ticks) * 100 / self.ticks) as u32
    }

    /// Percentage of elapsed time `pid` spent on the CPU
    pub fn process_cpu_usage(&self, pid: ProcessId) -> KernelResult<u32> {
        let process = self.process_ref(pid)?;
        let elapsed = self.now_ms().saturating_sub(process.created_at);
        if elapsed == 0 {
            return Ok(0);
        }
        Ok((process.cpu_time.min(elapsed) * 100 / elapsed) as u32)
    }

    /// Frame allocator occupancy and mapped totals across all processes
    pub fn get_memory_usage(&self) -> MemoryUsage {
        let total_frames = self.frames.total_count();
        let free_frames = self.frames.free_count();
        let mut usage = MemoryUsage {
            total_frames,
            free_frames,
            used_frames: total_frames - free_frames,
            shared_regions: self.shm.len(),
            ..Default::default()
        };

        for (_, process) in self.processes.iter() {
            usage.virtual_bytes += process.memory_stats.virtual_size;
            usage.resident_bytes += process.memory_stats.resident_size;
            usage.shared_bytes += process.memory_stats.shared_size;
        }
        usage
    }
}
