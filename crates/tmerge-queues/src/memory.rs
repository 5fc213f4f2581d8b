//! In-process task queue registry.
//!
//! [`MessageLoopTaskQueues`] keeps every queue's pending tasks and merge
//! relationships in one table behind a `Mutex`, paired with a `Condvar`
//! that message loops park on. Every state change that could make a task
//! runnable on some thread (posting, merging, unmerging, termination)
//! notifies all waiters; each loop re-checks its own queue.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use tmerge_types::QueueId;

use crate::error::{QueueError, Result};
use crate::message_loop::current_task_queue_id;
use crate::traits::TaskQueues;

/// A unit of work posted to a queue.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct QueueEntry {
    tasks: VecDeque<Task>,
    /// Queues this queue's thread services in addition to its own.
    owner_of: BTreeSet<QueueId>,
    /// Set while this queue is serviced by another queue's thread.
    subsumed_by: Option<QueueId>,
    terminated: bool,
}

impl QueueEntry {
    fn is_merged(&self) -> bool {
        !self.owner_of.is_empty() || self.subsumed_by.is_some()
    }
}

#[derive(Default)]
struct QueuesState {
    next_id: u64,
    queues: HashMap<QueueId, QueueEntry>,
}

impl QueuesState {
    /// Pop the next task the thread of `queue` should run, if any.
    ///
    /// A subsumed queue's thread gets nothing. An owner drains its own
    /// queue first, then the queues it owns in id order.
    fn pop_for(&mut self, queue: QueueId) -> Option<Task> {
        let entry = self.queues.get_mut(&queue)?;
        if entry.subsumed_by.is_some() {
            return None;
        }
        if let Some(task) = entry.tasks.pop_front() {
            return Some(task);
        }
        let owned: Vec<QueueId> = entry.owner_of.iter().copied().collect();
        owned
            .into_iter()
            .find_map(|sub| self.queues.get_mut(&sub)?.tasks.pop_front())
    }

    fn has_pending_for(&self, queue: QueueId) -> bool {
        let Some(entry) = self.queues.get(&queue) else {
            return false;
        };
        if entry.subsumed_by.is_some() {
            return false;
        }
        !entry.tasks.is_empty()
            || entry
                .owner_of
                .iter()
                .any(|sub| self.queues.get(sub).is_some_and(|e| !e.tasks.is_empty()))
    }
}

/// Registry of FIFO task queues with merge support.
///
/// Shared between message loops and thread mergers through an `Arc`.
pub struct MessageLoopTaskQueues {
    state: Mutex<QueuesState>,
    wakeup: Condvar,
}

impl MessageLoopTaskQueues {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueuesState::default()),
            wakeup: Condvar::new(),
        }
    }

    // Tasks never run while the lock is held, so a poisoned lock still
    // guards consistent bookkeeping.
    fn lock(&self) -> MutexGuard<'_, QueuesState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new, empty queue and return its id.
    pub fn create_task_queue(&self) -> QueueId {
        let mut state = self.lock();
        state.next_id += 1;
        let id = QueueId::from_raw(state.next_id);
        state.queues.insert(id, QueueEntry::default());
        debug!(queue = %id, "task queue created");
        id
    }

    /// Append a task to `queue`.
    pub fn register_task(&self, queue: QueueId, task: Task) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .queues
            .get_mut(&queue)
            .ok_or(QueueError::UnknownQueue(queue))?;
        if entry.terminated {
            return Err(QueueError::Terminated(queue));
        }
        entry.tasks.push_back(task);
        drop(state);
        self.wakeup.notify_all();
        Ok(())
    }

    /// Whether the thread servicing `queue` has anything to run right now.
    pub fn has_pending_tasks(&self, queue: QueueId) -> bool {
        self.lock().has_pending_for(queue)
    }

    /// Number of tasks queued directly on `queue`, ignoring merges.
    pub fn pending_task_count(&self, queue: QueueId) -> usize {
        self.lock().queues.get(&queue).map_or(0, |e| e.tasks.len())
    }

    /// Pop the next task for the thread of `queue` without blocking.
    pub fn next_task(&self, queue: QueueId) -> Option<Task> {
        self.lock().pop_for(queue)
    }

    /// Block until the thread of `queue` has a task to run.
    ///
    /// Returns `None` once the queue is terminated or disposed.
    pub fn wait_for_task(&self, queue: QueueId) -> Option<Task> {
        let mut state = self.lock();
        loop {
            match state.queues.get(&queue) {
                None => return None,
                Some(entry) if entry.terminated => return None,
                Some(_) => {}
            }
            if let Some(task) = state.pop_for(queue) {
                return Some(task);
            }
            state = self
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_for_task`](Self::wait_for_task) but gives up after
    /// `timeout` without a runnable task.
    pub fn wait_for_task_timeout(&self, queue: QueueId, timeout: Duration) -> Option<Task> {
        let state = self.lock();
        let (mut state, _) = self
            .wakeup
            .wait_timeout_while(state, timeout, |s| match s.queues.get(&queue) {
                None => false,
                Some(entry) if entry.terminated => false,
                Some(_) => !s.has_pending_for(queue),
            })
            .unwrap_or_else(PoisonError::into_inner);
        let live = matches!(state.queues.get(&queue), Some(entry) if !entry.terminated);
        if live {
            state.pop_for(queue)
        } else {
            None
        }
    }

    /// Stop handing out tasks for `queue`; its waiting loop returns.
    ///
    /// Tasks still queued are dropped when the queue is disposed.
    pub fn terminate(&self, queue: QueueId) {
        let mut state = self.lock();
        if let Some(entry) = state.queues.get_mut(&queue) {
            entry.terminated = true;
        }
        drop(state);
        self.wakeup.notify_all();
    }

    /// Remove `queue` and every merge relationship it takes part in.
    pub fn dispose(&self, queue: QueueId) {
        let mut state = self.lock();
        let Some(entry) = state.queues.remove(&queue) else {
            return;
        };
        if let Some(owner) = entry.subsumed_by {
            if let Some(owner_entry) = state.queues.get_mut(&owner) {
                owner_entry.owner_of.remove(&queue);
            }
        }
        for sub in &entry.owner_of {
            if let Some(sub_entry) = state.queues.get_mut(sub) {
                sub_entry.subsumed_by = None;
            }
        }
        if entry.is_merged() {
            warn!(queue = %queue, "disposed a queue that was still merged");
        }
        drop(state);
        self.wakeup.notify_all();
        debug!(queue = %queue, dropped_tasks = entry.tasks.len(), "task queue disposed");
    }

    /// The queues `owner` currently services through merges.
    pub fn subsumed_task_queue_ids(&self, owner: QueueId) -> Vec<QueueId> {
        self.lock()
            .queues
            .get(&owner)
            .map(|e| e.owner_of.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for MessageLoopTaskQueues {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageLoopTaskQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MessageLoopTaskQueues")
            .field("queues", &state.queues.len())
            .finish()
    }
}

impl TaskQueues for MessageLoopTaskQueues {
    fn merge(&self, owner: QueueId, subsumed: QueueId) -> bool {
        if owner == subsumed {
            return true;
        }
        let mut state = self.lock();
        let (Some(owner_entry), Some(subsumed_entry)) =
            (state.queues.get(&owner), state.queues.get(&subsumed))
        else {
            warn!(owner = %owner, subsumed = %subsumed, "merge of unknown queue");
            return false;
        };
        if owner_entry.owner_of.contains(&subsumed) {
            return true;
        }
        // An owner may service several queues, but never chains: the owner
        // must not itself be subsumed, and the subsumed queue must be free.
        if owner_entry.subsumed_by.is_some()
            || !subsumed_entry.owner_of.is_empty()
            || subsumed_entry.subsumed_by.is_some()
        {
            warn!(owner = %owner, subsumed = %subsumed, "conflicting merge refused");
            return false;
        }
        if let Some(entry) = state.queues.get_mut(&owner) {
            entry.owner_of.insert(subsumed);
        }
        if let Some(entry) = state.queues.get_mut(&subsumed) {
            entry.subsumed_by = Some(owner);
        }
        drop(state);
        self.wakeup.notify_all();
        info!(owner = %owner, subsumed = %subsumed, "task queues merged");
        true
    }

    fn unmerge(&self, owner: QueueId, subsumed: QueueId) -> bool {
        let mut state = self.lock();
        let owns = state
            .queues
            .get(&owner)
            .is_some_and(|e| e.subsumed_by.is_none() && e.owner_of.contains(&subsumed));
        let is_subsumed = state
            .queues
            .get(&subsumed)
            .is_some_and(|e| e.subsumed_by == Some(owner));
        if !owns || !is_subsumed {
            warn!(owner = %owner, subsumed = %subsumed, "unmerge of a pair that is not merged");
            return false;
        }
        if let Some(entry) = state.queues.get_mut(&owner) {
            entry.owner_of.remove(&subsumed);
        }
        if let Some(entry) = state.queues.get_mut(&subsumed) {
            entry.subsumed_by = None;
        }
        drop(state);
        self.wakeup.notify_all();
        info!(owner = %owner, subsumed = %subsumed, "task queues unmerged");
        true
    }

    fn owns(&self, owner: QueueId, subsumed: QueueId) -> bool {
        if owner == subsumed {
            return false;
        }
        self.lock()
            .queues
            .get(&owner)
            .is_some_and(|e| e.owner_of.contains(&subsumed))
    }

    fn runs_tasks_on_current_thread(&self, queue: QueueId) -> bool {
        match current_task_queue_id() {
            Some(current) => current == queue || self.owns(current, queue),
            None => false,
        }
    }
}
