//! Scheduler Tests
//!
//! Dispatch order, preemption, aging, sleeping and blocking on a software
//! backed scheduler.

mod common;

use common::{main_thread, run_ticks, scheduler, scheduler_with, ENTRY};
use tbos_kernel::{BlockReason, ProcessState, SchedConfig, ThreadState};

// ===== Dispatch Order Tests =====

#[test]
fn test_priority_then_fifo_order() {
    let mut sched = scheduler();
    let a = sched.create("A", ENTRY, 0, 5).unwrap();
    let b = sched.create("B", ENTRY, 0, 10).unwrap();
    let c = sched.create("C", ENTRY, 0, 5).unwrap();

    assert_eq!(sched.schedule().map(|(pid, _)| pid), Some(a));
    sched.block(a, BlockReason::Io).unwrap();
    assert_eq!(sched.schedule().map(|(pid, _)| pid), Some(c));
    sched.block(c, BlockReason::Io).unwrap();
    assert_eq!(sched.schedule().map(|(pid, _)| pid), Some(b));

    sched.assert_consistent();
}

#[test]
fn test_idle_when_nothing_ready() {
    let mut sched = scheduler();
    let pid = sched.create("only", ENTRY, 0, 20).unwrap();
    sched.schedule();
    sched.block(pid, BlockReason::Event(1)).unwrap();

    assert_eq!(sched.schedule(), None);
    assert_eq!(sched.current(), None);
}

#[test]
fn test_yield_alone_is_idempotent() {
    let mut sched = scheduler();
    let pid = sched.create("solo", ENTRY, 0, 17).unwrap();
    let running = sched.schedule().unwrap();
    let switches = sched.metrics().context_switches;

    assert_eq!(sched.yield_now(), Some(running));
    assert_eq!(sched.ready_len(), 0);
    assert_eq!(sched.get_priority(pid), Ok(17));
    assert_eq!(sched.thread(running.1).unwrap().effective_priority(), 17);
    assert_eq!(sched.metrics().context_switches, switches);
}

#[test]
fn test_yield_rotates_within_level() {
    let mut sched = scheduler();
    let a = sched.create("a", ENTRY, 0, 8).unwrap();
    let b = sched.create("b", ENTRY, 0, 8).unwrap();

    sched.schedule();
    assert_eq!(sched.yield_now().map(|(pid, _)| pid), Some(b));
    assert_eq!(sched.yield_now().map(|(pid, _)| pid), Some(a));
    assert_eq!(sched.metrics().voluntary_switches, 2);
}

// ===== Blocking Tests =====

#[test]
fn test_block_then_unblock_restores_priority() {
    let mut sched = scheduler();
    let pid = sched.create("io", ENTRY, 0, 12).unwrap();
    let tid = main_thread(&sched, pid);
    sched.schedule();

    sched.block(pid, BlockReason::Io).unwrap();
    assert_eq!(
        sched.process(pid).unwrap().state(),
        ProcessState::Blocked(BlockReason::Io)
    );
    assert_eq!(sched.queued_level(tid), None);

    sched.unblock(pid).unwrap();
    assert_eq!(sched.process(pid).unwrap().state(), ProcessState::Ready);
    assert_eq!(sched.queued_level(tid), Some(12));
    assert_eq!(sched.ready_threads_at(12), [tid]);
}

#[test]
fn test_unblock_requires_blocked_process() {
    let mut sched = scheduler();
    let pid = sched.create("p", ENTRY, 0, 12).unwrap();
    assert!(sched.unblock(pid).is_err());
}

// ===== Preemption Tests =====

#[test]
fn test_equal_priorities_alternate_each_slice() {
    let config = SchedConfig::new(20, true).with_tick_ms(10);
    let mut sched = scheduler_with(config);
    let x = sched.create("x", ENTRY, 0, 10).unwrap();
    let y = sched.create("y", ENTRY, 0, 10).unwrap();
    sched.schedule();

    let timeline = run_ticks(&mut sched, 6);
    assert_eq!(
        timeline,
        [Some(x), Some(y), Some(y), Some(x), Some(x), Some(y)]
    );
    assert_eq!(sched.metrics().preemptions, 3);
}

#[test]
fn test_lone_thread_keeps_cpu_without_preemption() {
    let config = SchedConfig::new(20, true).with_tick_ms(10);
    let mut sched = scheduler_with(config);
    let solo = sched.create("solo", ENTRY, 0, 10).unwrap();
    sched.schedule();
    let switches = sched.metrics().context_switches;

    let timeline = run_ticks(&mut sched, 6);
    assert!(timeline.iter().all(|pid| *pid == Some(solo)));
    assert_eq!(sched.metrics().preemptions, 0);
    assert_eq!(sched.metrics().context_switches, switches);
}

#[test]
fn test_aging_rescues_starved_thread() {
    // One-tick slices and a one-slice aging threshold
    let config = SchedConfig::new(10, true)
        .with_tick_ms(10)
        .with_aging_factor(1);
    let mut sched = scheduler_with(config);
    let hog = sched.create("hog", ENTRY, 0, 0).unwrap();
    let starved = sched.create("starved", ENTRY, 0, 39).unwrap();
    assert_eq!(sched.schedule().map(|(pid, _)| pid), Some(hog));

    let timeline = run_ticks(&mut sched, 39);
    assert_eq!(timeline.last(), Some(&Some(starved)));
    assert!(timeline[..38].iter().all(|pid| *pid == Some(hog)));
    assert!(sched.metrics().aging_boosts >= 39);
}

#[test]
fn test_aging_disabled_starves() {
    let config = SchedConfig::new(10, true)
        .with_tick_ms(10)
        .with_aging_factor(0);
    let mut sched = scheduler_with(config);
    let hog = sched.create("hog", ENTRY, 0, 0).unwrap();
    let starved = sched.create("starved", ENTRY, 0, 39).unwrap();
    sched.schedule();

    let timeline = run_ticks(&mut sched, 100);
    assert!(timeline.iter().all(|pid| *pid == Some(hog)));
    assert_eq!(
        sched.queued_level(main_thread(&sched, starved)),
        Some(39)
    );
}

// ===== Sleep Tests =====

#[test]
fn test_sleeper_wakes_at_deadline() {
    let mut sched = scheduler();
    let pid = sched.create("sleeper", ENTRY, 0, 10).unwrap();
    let tid = main_thread(&sched, pid);
    sched.schedule();

    assert_eq!(sched.sleep_current(25).unwrap(), None);
    assert_eq!(sched.sleep_deadline(tid), Some(25));
    assert_eq!(sched.process(pid).unwrap().state(), ProcessState::Sleeping);

    run_ticks(&mut sched, 2);
    assert!(matches!(
        sched.thread_state(tid),
        Ok(ThreadState::Sleeping { wake_at: 25 })
    ));

    // now = 30ms >= 25ms
    sched.timer_interrupt();
    assert_eq!(sched.sleep_deadline(tid), None);
    assert_eq!(sched.current_pid(), Some(pid));
}

#[test]
fn test_sleep_hands_cpu_to_next() {
    let mut sched = scheduler();
    sched.create("first", ENTRY, 0, 1).unwrap();
    let second = sched.create("second", ENTRY, 0, 2).unwrap();
    sched.schedule();

    let next = sched.sleep_current(100).unwrap();
    assert_eq!(next.map(|(pid, _)| pid), Some(second));
}

#[test]
fn test_unbounded_sleep_saturates() {
    let mut sched = scheduler();
    let pid = sched.create("forever", ENTRY, 0, 10).unwrap();
    let tid = main_thread(&sched, pid);
    sched.schedule();
    sched.timer_interrupt();

    assert_eq!(sched.sleep_current(u64::MAX).unwrap(), None);
    assert_eq!(sched.sleep_deadline(tid), Some(u64::MAX));
    run_ticks(&mut sched, 3);
    assert_eq!(sched.process(pid).unwrap().state(), ProcessState::Sleeping);
}

// ===== Invariant Tests =====

#[test]
fn test_mixed_workload_stays_consistent() {
    let mut sched = scheduler();
    let pids: Vec<_> = (0..6)
        .map(|i| sched.create("worker", ENTRY, i, (i * 7) as u8).unwrap())
        .collect();
    sched.thread_create(pids[2], ENTRY, 0, 0).unwrap();
    sched.schedule();

    for round in 0..50u64 {
        sched.timer_interrupt();
        match round % 5 {
            0 => {
                sched.yield_now();
            }
            1 => {
                if sched.current().is_some() {
                    sched.sleep_current(round * 3).unwrap();
                }
            }
            2 => {
                if let Some((_, tid)) = sched.current() {
                    sched.block_thread(tid, BlockReason::Event(round)).unwrap();
                }
            }
            3 => {
                let blocked: Vec<_> = pids
                    .iter()
                    .flat_map(|&pid| sched.process(pid).unwrap().threads.clone())
                    .filter(|&tid| sched.blocked_reason(tid).is_some())
                    .collect();
                for tid in blocked {
                    sched.unblock_thread(tid).unwrap();
                }
            }
            _ => {
                sched.schedule();
            }
        }
        sched.assert_consistent();
    }

    let stats = sched.get_stats();
    assert_eq!(stats.total_threads, 7);
    assert_eq!(stats.ticks, 50);
}
