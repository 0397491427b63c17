//! Bounded per-process message queue
//!
//! Every process owns one queue. Besides the queued messages it tracks the
//! threads waiting to receive from it and the senders parked on it while it
//! was full, together with the message each parked sender is delivering.

use alloc::{collections::VecDeque, vec::Vec};

use crate::process::{ProcessId, ThreadId};

/// A copied message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sending process, `None` for kernel-originated messages
    pub from: Option<ProcessId>,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(from: Option<ProcessId>, data: &[u8]) -> Self {
        Self {
            from,
            data: data.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this message passes a receive filter
    pub fn matches(&self, filter: Option<ProcessId>) -> bool {
        filter.is_none() || self.from == filter
    }
}

/// A sender blocked on a full queue, holding its undelivered message
#[derive(Debug)]
pub struct ParkedSend {
    pub sender: ThreadId,
    pub message: Message,
}

/// Message queue owned by one process
#[derive(Debug)]
pub struct MessageQueue {
    /// Queued messages
    messages: VecDeque<Message>,
    /// Maximum queue size
    capacity: usize,
    /// Threads waiting to receive, with the sender each one accepts
    waiting_receivers: VecDeque<(ThreadId, Option<ProcessId>)>,
    /// Threads waiting to send (when queue is full)
    waiting_senders: VecDeque<ParkedSend>,
}

impl MessageQueue {
    /// Create a new message queue
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            capacity,
            waiting_receivers: VecDeque::new(),
            waiting_senders: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a message, handing it back if the queue is full
    pub fn enqueue(&mut self, msg: Message) -> Result<(), Message> {
        if self.is_full() {
            return Err(msg);
        }
        self.messages.push_back(msg);
        Ok(())
    }

    /// Index of the oldest message passing `filter`
    pub fn position(&self, filter: Option<ProcessId>) -> Option<usize> {
        self.messages.iter().position(|m| m.matches(filter))
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    /// Remove the message at `index`
    pub fn take(&mut self, index: usize) -> Option<Message> {
        self.messages.remove(index)
    }

    /// Add a waiting receiver accepting messages that pass `filter`
    pub fn add_receiver(&mut self, tid: ThreadId, filter: Option<ProcessId>) {
        match self.waiting_receivers.iter_mut().find(|(t, _)| *t == tid) {
            Some(entry) => entry.1 = filter,
            None => self.waiting_receivers.push_back((tid, filter)),
        }
    }

    /// Pop the longest-waiting receiver that would accept a message from
    /// `from`
    pub fn pop_receiver_for(&mut self, from: Option<ProcessId>) -> Option<ThreadId> {
        let index = self
            .waiting_receivers
            .iter()
            .position(|&(_, filter)| filter.is_none() || filter == from)?;
        self.waiting_receivers.remove(index).map(|(tid, _)| tid)
    }

    pub fn remove_receiver(&mut self, tid: ThreadId) {
        self.waiting_receivers.retain(|&(t, _)| t != tid);
    }

    pub fn waiting_receivers(&self) -> usize {
        self.waiting_receivers.len()
    }

    /// Park a sender and its message until space frees
    pub fn park_sender(&mut self, sender: ThreadId, message: Message) {
        self.waiting_senders.push_back(ParkedSend { sender, message });
    }

    /// Pop the longest-parked sender
    pub fn pop_sender(&mut self) -> Option<ParkedSend> {
        self.waiting_senders.pop_front()
    }

    /// Withdraw the message parked by `sender`, if any
    pub fn withdraw_sender(&mut self, sender: ThreadId) -> Option<ParkedSend> {
        let index = self.waiting_senders.iter().position(|p| p.sender == sender)?;
        self.waiting_senders.remove(index)
    }

    pub fn parked_senders(&self) -> usize {
        self.waiting_senders.len()
    }

    /// Drop all messages and receivers, returning the parked senders
    pub fn clear(&mut self) -> Vec<ThreadId> {
        self.messages.clear();
        self.waiting_receivers.clear();
        self.waiting_senders.drain(..).map(|p| p.sender).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_enqueue() {
        let mut queue = MessageQueue::new(2);
        assert!(queue.enqueue(Message::new(None, b"a")).is_ok());
        assert!(queue.enqueue(Message::new(None, b"b")).is_ok());
        let rejected = queue.enqueue(Message::new(None, b"c")).unwrap_err();
        assert_eq!(rejected.data, b"c");
        assert!(queue.is_full());
    }

    #[test]
    fn test_filtered_position() {
        let mut queue = MessageQueue::new(4);
        queue
            .enqueue(Message::new(Some(ProcessId(1)), b"one"))
            .unwrap();
        queue
            .enqueue(Message::new(Some(ProcessId(2)), b"two"))
            .unwrap();

        assert_eq!(queue.position(None), Some(0));
        assert_eq!(queue.position(Some(ProcessId(2))), Some(1));
        assert_eq!(queue.position(Some(ProcessId(3))), None);

        let msg = queue.take(1).unwrap();
        assert_eq!(msg.data, b"two");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_parked_senders_fifo() {
        let mut queue = MessageQueue::new(1);
        queue.park_sender(ThreadId(4), Message::new(None, b"x"));
        queue.park_sender(ThreadId(5), Message::new(None, b"y"));

        let withdrawn = queue.withdraw_sender(ThreadId(5)).unwrap();
        assert_eq!(withdrawn.message.data, b"y");
        assert_eq!(queue.pop_sender().unwrap().sender, ThreadId(4));
        assert!(queue.pop_sender().is_none());
    }

    #[test]
    fn test_clear_returns_parked() {
        let mut queue = MessageQueue::new(1);
        queue.enqueue(Message::new(None, b"a")).unwrap();
        queue.add_receiver(ThreadId(1), None);
        queue.park_sender(ThreadId(2), Message::new(None, b"b"));

        assert_eq!(queue.clear(), alloc::vec![ThreadId(2)]);
        assert!(queue.is_empty());
        assert_eq!(queue.waiting_receivers(), 0);
    }

    #[test]
    fn test_receiver_chosen_by_filter() {
        let mut queue = MessageQueue::new(4);
        queue.add_receiver(ThreadId(1), Some(ProcessId(99)));
        queue.add_receiver(ThreadId(2), None);
        queue.add_receiver(ThreadId(3), Some(ProcessId(7)));

        // The oldest receiver only takes messages from process 99
        assert_eq!(queue.pop_receiver_for(None), Some(ThreadId(2)));
        assert_eq!(queue.pop_receiver_for(Some(ProcessId(5))), None);
        assert_eq!(queue.pop_receiver_for(Some(ProcessId(7))), Some(ThreadId(3)));
        assert_eq!(queue.pop_receiver_for(Some(ProcessId(99))), Some(ThreadId(1)));
        assert_eq!(queue.waiting_receivers(), 0);
    }

    #[test]
    fn test_rewaiting_receiver_updates_filter() {
        let mut queue = MessageQueue::new(4);
        queue.add_receiver(ThreadId(1), Some(ProcessId(3)));
        queue.add_receiver(ThreadId(1), None);

        assert_eq!(queue.waiting_receivers(), 1);
        assert_eq!(queue.pop_receiver_for(Some(ProcessId(8))), Some(ThreadId(1)));
    }
}
