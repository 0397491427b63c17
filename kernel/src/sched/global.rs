//! Process-wide scheduler instance
//!
//! Kernels with a single CPU-wide scheduler keep it here behind a spin lock.
//! Timer interrupts that arrive while the lock is held are counted and
//! replayed by the next locked operation instead of spinning in interrupt
//! context.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::{scheduler_init, Scheduler};
use crate::{
    config::SchedConfig,
    error::{KernelError, KernelResult},
};

static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

/// Ticks taken while the scheduler lock was held
static PENDING_TICKS: AtomicU64 = AtomicU64::new(0);

/// Install the global scheduler
pub fn init(config: SchedConfig) -> KernelResult<()> {
    let mut slot = SCHEDULER.lock();
    if slot.is_some() {
        return Err(KernelError::InvalidState {
            expected: "uninitialized",
            actual: "initialized",
        });
    }
    *slot = Some(scheduler_init(config)?);
    PENDING_TICKS.store(0, Ordering::Relaxed);
    Ok(())
}

/// Tear the global scheduler down, terminating every process
pub fn teardown() -> KernelResult<()> {
    let scheduler = SCHEDULER.lock().take().ok_or(KernelError::NotInitialized {
        subsystem: "scheduler",
    })?;
    scheduler.teardown();
    Ok(())
}

pub fn is_initialized() -> bool {
    SCHEDULER.lock().is_some()
}

/// Run `f` on the global scheduler
pub fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> KernelResult<R> {
    let mut slot = SCHEDULER.lock();
    let scheduler = slot.as_mut().ok_or(KernelError::NotInitialized {
        subsystem: "scheduler",
    })?;

    let missed = PENDING_TICKS.swap(0, Ordering::AcqRel);
    for _ in 0..missed {
        scheduler.timer_interrupt();
    }
    Ok(f(scheduler))
}

/// Timer interrupt entry point
pub fn timer_interrupt() {
    match SCHEDULER.try_lock() {
        Some(mut slot) => {
            if let Some(scheduler) = slot.as_mut() {
                scheduler.timer_interrupt();
            }
        }
        None => {
            PENDING_TICKS.fetch_add(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One test drives the whole lifecycle since the instance is shared
    // across the test binary.
    #[test]
    fn test_global_lifecycle() {
        assert!(!is_initialized());
        assert!(with_scheduler(|s| s.ticks()).is_err());

        init(SchedConfig::default()).unwrap();
        assert!(init(SchedConfig::default()).is_err());

        let pid = with_scheduler(|s| s.create("init", 0x1000, 0, 10))
            .unwrap()
            .unwrap();
        timer_interrupt();

        // A tick taken under the lock is replayed on the next access
        with_scheduler(|_| timer_interrupt()).unwrap();
        let (ticks, current) = with_scheduler(|s| (s.ticks(), s.current_pid())).unwrap();
        assert_eq!(ticks, 2);
        assert_eq!(current, Some(pid));

        teardown().unwrap();
        assert!(!is_initialized());
        assert!(teardown().is_err());
    }
}
