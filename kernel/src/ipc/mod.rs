//! Inter-Process Communication (IPC) subsystem
//!
//! Two mechanisms are provided:
//! - Bounded per-process message queues with sender backpressure
//! - Reference-counted shared memory regions
//!
//! Both are implemented as operations on [`crate::sched::Scheduler`] since
//! they block and wake threads.

pub mod message;
pub mod message_passing;
pub mod shared_memory;

pub use message::{Message, MessageQueue, ParkedSend};
pub use message_passing::Received;
pub use shared_memory::{SharedMemoryRegistry, SharedRegion};
