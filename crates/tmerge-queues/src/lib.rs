//! Task queues and message loops for tmerge.
//!
//! This crate is the queue layer that thread mergers drive. A queue is a
//! FIFO of closures identified by a [`QueueId`]; a [`MessageLoop`] is an OS
//! thread that services one queue. Two queues can be *merged*, after which
//! the owner's thread also drains the subsumed queue and the subsumed thread
//! sits idle until the pair is unmerged again.
//!
//! # Modules
//!
//! - [`error`] — Error types for queue operations
//! - [`traits`] — The [`TaskQueues`] trait consumed by thread mergers
//! - [`memory`] — [`MessageLoopTaskQueues`], the in-process FIFO registry
//! - [`message_loop`] — [`MessageLoop`] worker threads
//! - [`task_runner`] — [`TaskRunner`] posting handles
//!
//! [`QueueId`]: tmerge_types::QueueId

pub mod error;
pub mod memory;
pub mod message_loop;
pub mod task_runner;
pub mod traits;

pub use error::{QueueError, Result};
pub use memory::{MessageLoopTaskQueues, Task};
pub use message_loop::{current_task_queue_id, MessageLoop};
pub use task_runner::TaskRunner;
pub use traits::TaskQueues;
