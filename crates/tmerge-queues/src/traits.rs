//! The [`TaskQueues`] trait: the merge surface of the queue layer.
//!
//! Thread mergers only need to collapse and restore queue pairs and to ask
//! which thread services a queue. Any queue backend that can do that
//! implements this trait.

use tmerge_types::QueueId;

/// Queue backend that can merge two queues onto one physical thread.
///
/// Implementations must be thread-safe (`Send + Sync`); merge and unmerge
/// may be called from any thread, including the threads of the queues
/// involved.
pub trait TaskQueues: Send + Sync {
    /// Service `subsumed` on `owner`'s thread from now on.
    ///
    /// Returns `false` if the merge is not possible (unknown ids, or either
    /// queue already takes part in a conflicting merge). Merging a pair that
    /// is already merged, or a queue with itself, succeeds without effect.
    /// May block while the owner's thread picks up the subsumed queue.
    fn merge(&self, owner: QueueId, subsumed: QueueId) -> bool;

    /// Reverse a previous [`merge`](Self::merge) of the same pair.
    ///
    /// Returns `false` if `owner` does not currently own `subsumed`.
    fn unmerge(&self, owner: QueueId, subsumed: QueueId) -> bool;

    /// Whether `owner` currently services `subsumed` through a merge.
    fn owns(&self, owner: QueueId, subsumed: QueueId) -> bool;

    /// Whether the calling thread is the physical thread that services
    /// `queue` (its own loop, or the loop that owns it through a merge).
    fn runs_tasks_on_current_thread(&self, queue: QueueId) -> bool;
}
