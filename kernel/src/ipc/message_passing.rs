//! Message passing between processes
//!
//! Sends copy the payload into the target's bounded queue. A full queue
//! parks the sender together with its message; the message moves into the
//! queue as soon as a receive frees space, so a parked send completes
//! without being restarted. Receives that find nothing block the caller and
//! are restarted once a message they accept arrives.

use super::message::Message;
use crate::{
    arch::ContextHal,
    error::{IpcError, KernelError, KernelResult, SchedError},
    mm::FrameAllocator,
    process::{ProcessId, ThreadId},
    sched::{BlockReason, Completion, Scheduler},
};

/// Result of a completed receive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Sending process, `None` for messages sent from kernel context
    pub from: Option<ProcessId>,
    /// Bytes copied into the caller's buffer
    pub len: usize,
}

impl<H: ContextHal, F: FrameAllocator> Scheduler<H, F> {
    /// Send a copy of `data` to `to`.
    ///
    /// The sender is the running process, or nobody from kernel context.
    /// When the queue is full the running thread parks with its message and
    /// the call returns `Suspended`; the message is delivered once a receive
    /// frees a slot. If `to` exits first the message is dropped, the thread
    /// becomes ready again and [`Scheduler::take_send_failure`] reports the
    /// failure.
    pub fn send_message(&mut self, to: ProcessId, data: &[u8]) -> KernelResult<Completion<()>> {
        let max = self.config.max_message_size;
        if data.len() > max {
            return Err(IpcError::MessageTooLarge {
                size: data.len(),
                max,
            }
            .into());
        }
        match self.processes.get(to.0) {
            Some(target) if !target.is_zombie() => {}
            _ => return Err(KernelError::ProcessNotFound { pid: to.0 }),
        }

        let from = self.current_pid();
        let queue = &mut self.process_mut(to)?.messages;
        let message = match queue.enqueue(Message::new(from, data)) {
            Ok(()) => {
                log::trace!("[IPC] Queued {} bytes for process {}", data.len(), to);
                self.wake_receiver(to, from);
                self.check_invariants();
                return Ok(Completion::Done(()));
            }
            Err(message) => message,
        };

        // Queue full: apply backpressure to the caller
        let Some((_, tid)) = self.current else {
            return Err(IpcError::WouldBlock.into());
        };
        self.thread_mut(tid)?.failed_send = None;
        self.process_mut(to)?.messages.park_sender(tid, message);
        self.suspend_thread(tid, BlockReason::MessageSend { target: to })?;
        log::debug!("[IPC] Thread {} parked on full queue of process {}", tid, to);

        self.reschedule(true);
        self.check_invariants();
        Ok(Completion::Suspended)
    }

    /// Receive into `buf` on behalf of the running process, blocking when no
    /// matching message is queued.
    ///
    /// `from` of `None` accepts any sender.
    pub fn receive_message(
        &mut self,
        from: Option<ProcessId>,
        buf: &mut [u8],
    ) -> KernelResult<Completion<Received>> {
        let (pid, tid) = self.current.ok_or(SchedError::NoCurrentThread)?;

        match self.try_receive(pid, from, buf) {
            Ok(received) => Ok(Completion::Done(received)),
            Err(err) if err.is_would_block() => {
                self.process_mut(pid)?.messages.add_receiver(tid, from);
                self.suspend_thread(tid, BlockReason::MessageReceive)?;
                log::debug!("[IPC] Thread {} waiting for a message", tid);

                self.reschedule(true);
                self.check_invariants();
                Ok(Completion::Suspended)
            }
            Err(err) => Err(err),
        }
    }

    /// Take the first message in `pid`'s queue matching `from` without
    /// blocking.
    ///
    /// A message larger than `buf` stays queued and the call fails with
    /// `MessageTooLarge`.
    pub fn try_receive(
        &mut self,
        pid: ProcessId,
        from: Option<ProcessId>,
        buf: &mut [u8],
    ) -> KernelResult<Received> {
        let queue = &mut self.process_mut(pid)?.messages;
        let index = queue.position(from).ok_or(IpcError::WouldBlock)?;
        let size = queue.get(index).map_or(0, Message::len);
        if size > buf.len() {
            return Err(IpcError::MessageTooLarge {
                size,
                max: buf.len(),
            }
            .into());
        }

        let message = queue.take(index).ok_or(IpcError::WouldBlock)?;
        buf[..size].copy_from_slice(&message.data);
        self.admit_parked_senders(pid);

        log::trace!("[IPC] Process {} received {} bytes", pid, size);
        self.check_invariants();
        Ok(Received {
            from: message.from,
            len: size,
        })
    }

    /// Take the failure of `tid`'s last parked send, if its target exited
    /// before the message was admitted.
    ///
    /// Each failure is reported once.
    pub fn take_send_failure(&mut self, tid: ThreadId) -> Option<KernelError> {
        let target = self.threads.get_mut(tid.0)?.failed_send.take()?;
        Some(KernelError::ProcessNotFound { pid: target.0 })
    }

    /// Messages waiting in `pid`'s queue
    pub fn pending_messages(&self, pid: ProcessId) -> KernelResult<usize> {
        Ok(self.process_ref(pid)?.messages.len())
    }

    /// Wake the longest-waiting receiver of `pid` that accepts a message
    /// from `from`
    fn wake_receiver(&mut self, pid: ProcessId, from: Option<ProcessId>) {
        loop {
            let Some(process) = self.processes.get_mut(pid.0) else {
                return;
            };
            let Some(tid) = process.messages.pop_receiver_for(from) else {
                return;
            };
            // Stale entries belong to threads woken some other way
            if self.wake_if(tid, |reason| *reason == BlockReason::MessageReceive) {
                return;
            }
        }
    }

    /// Move parked messages into `pid`'s queue while it has room
    fn admit_parked_senders(&mut self, pid: ProcessId) {
        loop {
            let Some(process) = self.processes.get_mut(pid.0) else {
                return;
            };
            let queue = &mut process.messages;
            if queue.is_full() {
                return;
            }
            let Some(parked) = queue.pop_sender() else {
                return;
            };
            let from = parked.message.from;
            if let Err(message) = queue.enqueue(parked.message) {
                queue.park_sender(parked.sender, message);
                return;
            }

            log::debug!(
                "[IPC] Parked message of thread {} admitted to process {}",
                parked.sender,
                pid
            );
            self.wake_if(parked.sender, |reason| {
                *reason == BlockReason::MessageSend { target: pid }
            });
            self.wake_receiver(pid, from);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::SchedConfig, sched::scheduler_init};

    #[test]
    fn test_kernel_send_and_try_receive() {
        let mut s = scheduler_init(SchedConfig::default()).unwrap();
        let pid = s.create("p", 0x1000, 0, 10).unwrap();

        assert!(s.send_message(pid, b"ping").unwrap().is_done());
        assert_eq!(s.pending_messages(pid), Ok(1));

        let mut buf = [0u8; 16];
        let received = s.try_receive(pid, None, &mut buf).unwrap();
        assert_eq!(received, Received { from: None, len: 4 });
        assert_eq!(&buf[..4], b"ping");
        assert!(s.try_receive(pid, None, &mut buf).unwrap_err().is_would_block());
    }

    #[test]
    fn test_oversized_message_stays_queued() {
        let mut s = scheduler_init(SchedConfig::default()).unwrap();
        let pid = s.create("p", 0x1000, 0, 10).unwrap();
        s.send_message(pid, b"twelve bytes").unwrap();

        let mut small = [0u8; 4];
        assert_eq!(
            s.try_receive(pid, None, &mut small),
            Err(IpcError::MessageTooLarge { size: 12, max: 4 }.into())
        );
        assert_eq!(s.pending_messages(pid), Ok(1));
    }

    #[test]
    fn test_send_limits() {
        let config = SchedConfig::default()
            .with_max_message_size(8)
            .with_message_queue_capacity(1);
        let mut s = scheduler_init(config).unwrap();
        let pid = s.create("p", 0x1000, 0, 10).unwrap();

        assert!(matches!(
            s.send_message(pid, &[0; 9]),
            Err(KernelError::IpcError(IpcError::MessageTooLarge { .. }))
        ));
        assert_eq!(
            s.send_message(ProcessId(99), b"x"),
            Err(KernelError::ProcessNotFound { pid: 99 })
        );

        s.send_message(pid, b"a").unwrap();
        // No running thread to park
        assert!(s.send_message(pid, b"b").unwrap_err().is_would_block());
    }

    #[test]
    fn test_filtered_receive() {
        let mut s = scheduler_init(SchedConfig::default()).unwrap();
        let pid = s.create("p", 0x1000, 0, 10).unwrap();
        s.send_message(pid, b"kernel").unwrap();

        let mut buf = [0u8; 16];
        assert!(s
            .try_receive(pid, Some(ProcessId(42)), &mut buf)
            .unwrap_err()
            .is_would_block());
        assert_eq!(s.try_receive(pid, None, &mut buf).map(|r| r.len), Ok(6));
    }
}
