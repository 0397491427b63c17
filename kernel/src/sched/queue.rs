//! Ready queue management for scheduler
//!
//! One FIFO per priority level, with a bitmap of non-empty levels so picking
//! the most urgent thread is a single `trailing_zeros`. A thread is in at most
//! one level at a time; the level index is tracked alongside.

use alloc::{
    collections::{BTreeMap, VecDeque},
    vec::Vec,
};

use crate::{config::NUM_PRIORITIES, process::ThreadId};

/// Multi-level ready queue
#[derive(Debug)]
pub struct ReadyQueues {
    levels: Vec<VecDeque<ThreadId>>,
    /// Level each queued thread sits at
    level_of: BTreeMap<ThreadId, u8>,
    /// Bit n set when level n is non-empty
    bitmap: u64,
}

impl Default for ReadyQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueues {
    pub fn new() -> Self {
        Self {
            levels: (0..NUM_PRIORITIES).map(|_| VecDeque::new()).collect(),
            level_of: BTreeMap::new(),
            bitmap: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.level_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap == 0
    }

    pub fn len_at(&self, level: u8) -> usize {
        self.levels.get(level as usize).map_or(0, VecDeque::len)
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.level_of.contains_key(&tid)
    }

    pub fn level_of(&self, tid: ThreadId) -> Option<u8> {
        self.level_of.get(&tid).copied()
    }

    /// Append at the tail of `level`
    pub fn push_back(&mut self, tid: ThreadId, level: u8) {
        let level = level.min((NUM_PRIORITIES - 1) as u8);
        if let Some(existing) = self.level_of.insert(tid, level) {
            panic!(
                "[SCHED] invariant violated: thread {} already queued at level {}",
                tid, existing
            );
        }
        self.levels[level as usize].push_back(tid);
        self.bitmap |= 1 << level;
    }

    /// Most urgent non-empty level
    pub fn highest_level(&self) -> Option<u8> {
        (self.bitmap != 0).then(|| self.bitmap.trailing_zeros() as u8)
    }

    /// Head of the most urgent non-empty level
    pub fn peek(&self) -> Option<ThreadId> {
        let level = self.highest_level()?;
        self.levels[level as usize].front().copied()
    }

    /// Dequeue highest priority thread
    pub fn pop_front(&mut self) -> Option<(ThreadId, u8)> {
        let level = self.highest_level()?;
        let queue = &mut self.levels[level as usize];
        let tid = queue.pop_front()?;
        if queue.is_empty() {
            self.bitmap &= !(1 << level);
        }
        self.level_of.remove(&tid);
        Some((tid, level))
    }

    /// Remove a thread wherever it is queued, returning its level
    pub fn remove(&mut self, tid: ThreadId) -> Option<u8> {
        let level = self.level_of.remove(&tid)?;
        let queue = &mut self.levels[level as usize];
        queue.retain(|&t| t != tid);
        if queue.is_empty() {
            self.bitmap &= !(1 << level);
        }
        Some(level)
    }

    /// Threads at `level`, head first
    pub fn threads_at(&self, level: u8) -> Vec<ThreadId> {
        self.levels
            .get(level as usize)
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Queued threads as (thread, level), most urgent level first
    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, u8)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .flat_map(|(level, q)| q.iter().map(move |&tid| (tid, level as u8)))
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;

    #[test]
    fn test_lowest_level_first() {
        let mut queues = ReadyQueues::new();
        queues.push_back(ThreadId(1), 10);
        queues.push_back(ThreadId(2), 5);
        queues.push_back(ThreadId(3), 39);

        assert_eq!(queues.highest_level(), Some(5));
        assert_eq!(queues.pop_front(), Some((ThreadId(2), 5)));
        assert_eq!(queues.pop_front(), Some((ThreadId(1), 10)));
        assert_eq!(queues.pop_front(), Some((ThreadId(3), 39)));
        assert_eq!(queues.pop_front(), None);
        assert!(queues.is_empty());
    }

    #[test]
    fn test_fifo_within_level() {
        let mut queues = ReadyQueues::new();
        for tid in 1..=3 {
            queues.push_back(ThreadId(tid), 7);
        }
        assert_eq!(
            queues.threads_at(7),
            vec![ThreadId(1), ThreadId(2), ThreadId(3)]
        );
        assert_eq!(queues.peek(), Some(ThreadId(1)));
    }

    #[test]
    fn test_remove_clears_bitmap() {
        let mut queues = ReadyQueues::new();
        queues.push_back(ThreadId(1), 3);
        queues.push_back(ThreadId(2), 8);
        assert_eq!(queues.remove(ThreadId(1)), Some(3));
        assert_eq!(queues.highest_level(), Some(8));
        assert_eq!(queues.remove(ThreadId(1)), None);
        assert_eq!(queues.len(), 1);
    }

    #[test]
    #[should_panic(expected = "already queued")]
    fn test_double_enqueue_panics() {
        let mut queues = ReadyQueues::new();
        queues.push_back(ThreadId(1), 3);
        queues.push_back(ThreadId(1), 4);
    }
}
