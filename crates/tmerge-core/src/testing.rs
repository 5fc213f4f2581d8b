//! Queue-layer double that counts physical merges and unmerges.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use tmerge_queues::TaskQueues;
use tmerge_types::QueueId;

#[derive(Default)]
pub(crate) struct RecordingTaskQueues {
    merged: Mutex<bool>,
    pub(crate) merges: AtomicUsize,
    pub(crate) unmerges: AtomicUsize,
    /// Merging an already merged pair, or unmerging an unmerged one.
    pub(crate) redundant_calls: AtomicUsize,
    pub(crate) fail_merge: AtomicBool,
    pub(crate) fail_unmerge: AtomicBool,
}

impl RecordingTaskQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_merged(&self) -> bool {
        *self.merged.lock().unwrap()
    }

    pub(crate) fn merges(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }

    pub(crate) fn unmerges(&self) -> usize {
        self.unmerges.load(Ordering::SeqCst)
    }

    pub(crate) fn redundant_calls(&self) -> usize {
        self.redundant_calls.load(Ordering::SeqCst)
    }
}

impl TaskQueues for RecordingTaskQueues {
    fn merge(&self, _owner: QueueId, _subsumed: QueueId) -> bool {
        if self.fail_merge.load(Ordering::SeqCst) {
            return false;
        }
        let mut merged = self.merged.lock().unwrap();
        if *merged {
            self.redundant_calls.fetch_add(1, Ordering::SeqCst);
        }
        *merged = true;
        self.merges.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn unmerge(&self, _owner: QueueId, _subsumed: QueueId) -> bool {
        if self.fail_unmerge.load(Ordering::SeqCst) {
            return false;
        }
        let mut merged = self.merged.lock().unwrap();
        if !*merged {
            self.redundant_calls.fetch_add(1, Ordering::SeqCst);
        }
        *merged = false;
        self.unmerges.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn owns(&self, owner: QueueId, subsumed: QueueId) -> bool {
        owner != subsumed && self.is_merged()
    }

    fn runs_tasks_on_current_thread(&self, _queue: QueueId) -> bool {
        false
    }
}
