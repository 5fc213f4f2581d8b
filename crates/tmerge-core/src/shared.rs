use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use tmerge_queues::TaskQueues;
use tmerge_types::{CallerId, LeaseTerm, QueueId};

use crate::error::{MergerError, Result};
use crate::ledger::LeaseLedger;

/// Coordinator for merging one (owner, subsumed) queue pair.
///
/// Every call site that wants the pair merged registers a lease under its
/// own [`CallerId`]. The pair is merged by the first lease and split only
/// when the last registered caller reclaims its entry through
/// [`unmerge_now_if_last_one`](Self::unmerge_now_if_last_one).
///
/// # Locking
///
/// One mutex guards the lease ledger and the merged flag. Every
/// decide-and-act sequence (merging, removing an entry and checking for
/// emptiness, unmerging) runs under a single acquisition, so exactly one
/// caller per merge episode observes that it was the last one and performs
/// the unmerge. The lock is held across the calls into the queue layer.
///
/// Coordinators are shared through `Arc`: several unrelated
/// [`RasterThreadMerger`](crate::RasterThreadMerger)s may lease the same
/// pair.
pub struct SharedThreadMerger {
    owner: QueueId,
    subsumed: QueueId,
    task_queues: Arc<dyn TaskQueues>,
    ledger: Mutex<LeaseLedger>,
    /// Signalled whenever the merged flag flips.
    merged_changed: Condvar,
}

impl SharedThreadMerger {
    /// Create an unmerged coordinator for `owner` and `subsumed`.
    pub fn new(owner: QueueId, subsumed: QueueId, task_queues: Arc<dyn TaskQueues>) -> Self {
        Self {
            owner,
            subsumed,
            task_queues,
            ledger: Mutex::new(LeaseLedger::default()),
            merged_changed: Condvar::new(),
        }
    }

    // The ledger is only mutated by short, panic-free sections, so a
    // poisoned lock still holds consistent data.
    fn lock(&self) -> MutexGuard<'_, LeaseLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn owner(&self) -> QueueId {
        self.owner
    }

    pub fn subsumed(&self) -> QueueId {
        self.subsumed
    }

    pub fn task_queues(&self) -> &Arc<dyn TaskQueues> {
        &self.task_queues
    }

    /// Lease the merge for `lease_term` units on behalf of `caller`.
    ///
    /// Merges the pair if it is not merged yet. The caller's term is
    /// overwritten, not accumulated: re-issuing a smaller lease shortens the
    /// caller's own pending lease. Returns `Ok(true)` when this call
    /// performed the physical merge.
    ///
    /// A zero `lease_term` is ignored. If the queue layer refuses the merge
    /// nothing is recorded and [`MergerError::MergeFailed`] is returned.
    pub fn merge_with_lease(&self, caller: CallerId, lease_term: LeaseTerm) -> Result<bool> {
        if lease_term == 0 {
            warn!(caller = %caller, "merge requested with zero lease term; ignored");
            return Ok(false);
        }
        let mut ledger = self.lock();
        let transitioned = if ledger.is_merged() {
            false
        } else {
            if !self.task_queues.merge(self.owner, self.subsumed) {
                return Err(MergerError::MergeFailed {
                    owner: self.owner,
                    subsumed: self.subsumed,
                });
            }
            ledger.set_merged(true);
            true
        };
        ledger.set_term(caller, lease_term);
        drop(ledger);

        if transitioned {
            self.merged_changed.notify_all();
            info!(owner = %self.owner, subsumed = %self.subsumed, caller = %caller, lease_term, "queues merged");
        } else {
            debug!(caller = %caller, lease_term, "lease recorded on merged queues");
        }
        Ok(transitioned)
    }

    /// Raise `caller`'s remaining term to `lease_term` without re-merging.
    ///
    /// Never lowers a term. Ignored when the pair is not merged or when
    /// `lease_term` is zero.
    pub fn extend_lease_to(&self, caller: CallerId, lease_term: LeaseTerm) {
        if lease_term == 0 {
            warn!(caller = %caller, "lease extended with zero term; ignored");
            return;
        }
        let mut ledger = self.lock();
        if !ledger.is_merged() {
            warn!(caller = %caller, "lease extended while unmerged; ignored");
            return;
        }
        ledger.raise_term(caller, lease_term);
        debug!(caller = %caller, term = ?ledger.term(caller), "lease extended");
    }

    /// Take one unit off `caller`'s term.
    ///
    /// Returns whether every registered caller is now at zero, so the
    /// invoker can decide to attempt an unmerge. Unregistered or exhausted
    /// callers leave the ledger unchanged. Never changes the merged state.
    pub fn decrement_lease(&self, caller: CallerId) -> bool {
        let mut ledger = self.lock();
        ledger.decrement(caller);
        ledger.all_terms_zero()
    }

    /// Reclaim `caller`'s entry and unmerge if no other caller remains.
    ///
    /// The caller is expected to have run its term down to zero first; this
    /// is not re-checked. Returns `Ok(true)` only when this call performed
    /// the physical unmerge. Callers with entries left in the ledger, even
    /// exhausted ones, keep the pair merged.
    ///
    /// If the queue layer refuses the unmerge, the caller's entry is put
    /// back so the teardown can be retried, the pair stays merged, and
    /// [`MergerError::UnmergeFailed`] is returned.
    pub fn unmerge_now_if_last_one(&self, caller: CallerId) -> Result<bool> {
        let mut ledger = self.lock();
        let removed = ledger.remove(caller);
        match removed {
            None => warn!(caller = %caller, "unmerge requested by unregistered caller"),
            Some(term) if term > 0 => {
                warn!(caller = %caller, remaining = term, "lease released before it ran out");
            }
            Some(_) => {}
        }

        if !ledger.is_empty() || !ledger.is_merged() {
            debug!(caller = %caller, remaining_callers = ledger.len(), "merge kept");
            return Ok(false);
        }

        if !self.task_queues.unmerge(self.owner, self.subsumed) {
            if let Some(term) = removed {
                ledger.set_term(caller, term);
            }
            return Err(MergerError::UnmergeFailed {
                owner: self.owner,
                subsumed: self.subsumed,
            });
        }
        ledger.set_merged(false);
        drop(ledger);

        self.merged_changed.notify_all();
        info!(owner = %self.owner, subsumed = %self.subsumed, caller = %caller, "queues unmerged");
        Ok(true)
    }

    /// Whether the pair is currently merged.
    pub fn is_merged(&self) -> bool {
        self.lock().is_merged()
    }

    /// The remaining term of `caller`, or `None` if it holds no lease.
    pub fn lease_term(&self, caller: CallerId) -> Option<LeaseTerm> {
        self.lock().term(caller)
    }

    /// Snapshot of every registered caller and its remaining term.
    pub fn leases(&self) -> Vec<(CallerId, LeaseTerm)> {
        self.lock().entries()
    }

    /// Block until the pair is merged.
    pub fn wait_until_merged(&self) {
        let ledger = self.lock();
        let _merged = self
            .merged_changed
            .wait_while(ledger, |l| !l.is_merged())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until the pair is merged or `timeout` elapses. Returns whether
    /// the pair is merged.
    pub fn wait_until_merged_timeout(&self, timeout: Duration) -> bool {
        let ledger = self.lock();
        let (ledger, _) = self
            .merged_changed
            .wait_timeout_while(ledger, timeout, |l| !l.is_merged())
            .unwrap_or_else(PoisonError::into_inner);
        ledger.is_merged()
    }
}

impl fmt::Debug for SharedThreadMerger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ledger = self.lock();
        f.debug_struct("SharedThreadMerger")
            .field("owner", &self.owner)
            .field("subsumed", &self.subsumed)
            .field("merged", &ledger.is_merged())
            .field("leases", &ledger.entries())
            .finish()
    }
}
