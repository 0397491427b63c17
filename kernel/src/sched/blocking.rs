//! Blocked and sleeping sets
//!
//! Threads that cannot run are held here, never on a ready queue. Blocked
//! threads are grouped by the reason they wait for so a single event wakes
//! its waiters in arrival order. Sleepers are ordered by wake deadline so the
//! tick only touches entries that have expired.

use alloc::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    vec::Vec,
};

use crate::process::{ProcessId, ThreadId};

/// Why a thread is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockReason {
    /// Waiting on a device or filesystem request
    Io,
    /// Waiting in `wait` for a child to change state
    WaitChild,
    /// Waiting for a message on its own queue
    MessageReceive,
    /// Waiting for space in the target's full queue
    MessageSend { target: ProcessId },
    /// Stopped by SIGSTOP until SIGCONT
    Stopped,
    /// Waiting on a caller-defined event
    Event(u64),
}

impl BlockReason {
    pub fn is_ipc(&self) -> bool {
        matches!(self, Self::MessageReceive | Self::MessageSend { .. })
    }
}

/// Blocked threads keyed by reason
#[derive(Debug, Default)]
pub struct BlockedSet {
    by_reason: BTreeMap<BlockReason, VecDeque<ThreadId>>,
    reason_of: BTreeMap<ThreadId, BlockReason>,
}

impl BlockedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reason_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reason_of.is_empty()
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.reason_of.contains_key(&tid)
    }

    pub fn reason_of(&self, tid: ThreadId) -> Option<BlockReason> {
        self.reason_of.get(&tid).copied()
    }

    pub fn insert(&mut self, tid: ThreadId, reason: BlockReason) {
        if let Some(existing) = self.reason_of.insert(tid, reason) {
            panic!(
                "[SCHED] invariant violated: thread {} already blocked on {:?}",
                tid, existing
            );
        }
        self.by_reason.entry(reason).or_default().push_back(tid);
    }

    pub fn remove(&mut self, tid: ThreadId) -> Option<BlockReason> {
        let reason = self.reason_of.remove(&tid)?;
        if let Some(waiters) = self.by_reason.get_mut(&reason) {
            waiters.retain(|&t| t != tid);
            if waiters.is_empty() {
                self.by_reason.remove(&reason);
            }
        }
        Some(reason)
    }

    /// Threads blocked on `reason`, longest-waiting first
    pub fn blocked_on(&self, reason: &BlockReason) -> Vec<ThreadId> {
        self.by_reason
            .get(reason)
            .map(|waiters| waiters.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, BlockReason)> + '_ {
        self.reason_of.iter().map(|(&tid, &reason)| (tid, reason))
    }
}

/// Sleeping threads ordered by wake deadline (ms)
#[derive(Debug, Default)]
pub struct SleepQueue {
    entries: BTreeSet<(u64, ThreadId)>,
    deadline_of: BTreeMap<ThreadId, u64>,
}

impl SleepQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deadline_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadline_of.is_empty()
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.deadline_of.contains_key(&tid)
    }

    pub fn deadline_of(&self, tid: ThreadId) -> Option<u64> {
        self.deadline_of.get(&tid).copied()
    }

    pub fn insert(&mut self, tid: ThreadId, wake_at: u64) {
        if let Some(existing) = self.deadline_of.insert(tid, wake_at) {
            panic!(
                "[SCHED] invariant violated: thread {} already sleeping until {}",
                tid, existing
            );
        }
        self.entries.insert((wake_at, tid));
    }

    pub fn remove(&mut self, tid: ThreadId) -> Option<u64> {
        let wake_at = self.deadline_of.remove(&tid)?;
        self.entries.remove(&(wake_at, tid));
        Some(wake_at)
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.first().map(|&(wake_at, _)| wake_at)
    }

    /// Remove and return every sleeper with `wake_at <= now`, earliest first
    pub fn pop_expired(&mut self, now: u64) -> Vec<ThreadId> {
        let mut expired = Vec::new();
        while let Some(&(wake_at, tid)) = self.entries.first() {
            if wake_at > now {
                break;
            }
            self.entries.pop_first();
            self.deadline_of.remove(&tid);
            expired.push(tid);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[test]
    fn test_blocked_grouped_by_reason() {
        let mut blocked = BlockedSet::new();
        blocked.insert(ThreadId(1), BlockReason::Io);
        blocked.insert(ThreadId(2), BlockReason::WaitChild);
        blocked.insert(ThreadId(3), BlockReason::Io);

        assert_eq!(
            blocked.blocked_on(&BlockReason::Io),
            vec![ThreadId(1), ThreadId(3)]
        );
        assert_eq!(blocked.remove(ThreadId(1)), Some(BlockReason::Io));
        assert_eq!(blocked.blocked_on(&BlockReason::Io), vec![ThreadId(3)]);
        assert_eq!(blocked.len(), 2);
        assert_eq!(blocked.remove(ThreadId(1)), None);
    }

    #[test]
    #[should_panic(expected = "already blocked")]
    fn test_double_block_panics() {
        let mut blocked = BlockedSet::new();
        blocked.insert(ThreadId(1), BlockReason::Io);
        blocked.insert(ThreadId(1), BlockReason::Stopped);
    }

    #[test]
    fn test_sleepers_expire_in_deadline_order() {
        let mut sleeping = SleepQueue::new();
        sleeping.insert(ThreadId(1), 50);
        sleeping.insert(ThreadId(2), 20);
        sleeping.insert(ThreadId(3), 30);

        assert_eq!(sleeping.next_deadline(), Some(20));
        assert!(sleeping.pop_expired(19).is_empty());
        assert_eq!(sleeping.pop_expired(30), vec![ThreadId(2), ThreadId(3)]);
        assert_eq!(sleeping.len(), 1);
        assert_eq!(sleeping.remove(ThreadId(1)), Some(50));
        assert!(sleeping.is_empty());
    }
}
