use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use tmerge_queues::TaskQueues;
use tmerge_types::{CallerId, LeaseTerm, QueueId, RasterThreadStatus};

use crate::config::MergerConfig;
use crate::error::Result;
use crate::shared::SharedThreadMerger;

type MergeUnmergeCallback = Arc<dyn Fn() + Send + Sync>;

/// Per-call-site handle for merging the raster queue into the platform
/// queue.
///
/// Each `RasterThreadMerger` leases the merge under its own [`CallerId`]
/// and forwards to a [`SharedThreadMerger`] that may be shared with other
/// call sites for the same queue pair.
///
/// Dropping a merger does **not** release its lease. A call site must run
/// its term down with [`decrement_lease`](Self::decrement_lease) and
/// reclaim it with [`unmerge_now_if_last_one`](Self::unmerge_now_if_last_one)
/// first; a leaked lease keeps the queues merged for good.
///
/// When the platform and raster queues are the same queue, every operation
/// is a no-op and the merger reports itself merged.
pub struct RasterThreadMerger {
    id: CallerId,
    platform_queue_id: QueueId,
    raster_queue_id: QueueId,
    shared: Arc<SharedThreadMerger>,
    config: MergerConfig,
    enabled: AtomicBool,
    callback: Mutex<Option<MergeUnmergeCallback>>,
}

impl RasterThreadMerger {
    /// Create a merger with its own, fresh coordinator.
    pub fn new(
        platform_queue_id: QueueId,
        raster_queue_id: QueueId,
        task_queues: Arc<dyn TaskQueues>,
    ) -> Self {
        let shared = Arc::new(SharedThreadMerger::new(
            platform_queue_id,
            raster_queue_id,
            task_queues,
        ));
        Self::with_shared(shared, &MergerConfig::default())
    }

    /// Create a merger leasing through an existing coordinator.
    pub fn with_shared(shared: Arc<SharedThreadMerger>, config: &MergerConfig) -> Self {
        Self {
            id: CallerId::next(),
            platform_queue_id: shared.owner(),
            raster_queue_id: shared.subsumed(),
            shared,
            config: config.clone(),
            enabled: AtomicBool::new(config.enabled),
            callback: Mutex::new(None),
        }
    }

    /// Share `parent`'s coordinator (and configuration) when it serves the
    /// same queue pair, otherwise start a new one.
    pub fn create_or_share(
        parent: Option<&RasterThreadMerger>,
        platform_queue_id: QueueId,
        raster_queue_id: QueueId,
        task_queues: Arc<dyn TaskQueues>,
    ) -> Self {
        match parent {
            Some(p)
                if p.platform_queue_id == platform_queue_id
                    && p.raster_queue_id == raster_queue_id =>
            {
                Self::with_shared(p.shared.clone(), &p.config)
            }
            _ => Self::new(platform_queue_id, raster_queue_id, task_queues),
        }
    }

    pub fn caller_id(&self) -> CallerId {
        self.id
    }

    pub fn platform_queue_id(&self) -> QueueId {
        self.platform_queue_id
    }

    pub fn raster_queue_id(&self) -> QueueId {
        self.raster_queue_id
    }

    /// The coordinator this merger leases through.
    pub fn shared_merger(&self) -> &Arc<SharedThreadMerger> {
        &self.shared
    }

    /// Whether platform and raster tasks already share one queue.
    pub fn task_queues_are_same(&self) -> bool {
        self.platform_queue_id == self.raster_queue_id
    }

    /// Lease the merge for `lease_term` frames.
    ///
    /// Overwrites this merger's own remaining term. Returns `Ok(true)` when
    /// this call merged the queues, in which case the merge/unmerge
    /// callback has run.
    pub fn merge_with_lease(&self, lease_term: LeaseTerm) -> Result<bool> {
        if self.task_queues_are_same() || !self.is_enabled() {
            return Ok(false);
        }
        let merged = self.shared.merge_with_lease(self.id, lease_term)?;
        if merged {
            self.run_callback();
        }
        Ok(merged)
    }

    /// [`merge_with_lease`](Self::merge_with_lease) with the configured
    /// default term.
    pub fn merge_with_default_lease(&self) -> Result<bool> {
        self.merge_with_lease(self.config.default_lease_term)
    }

    /// Raise this merger's remaining term to `lease_term` if it is larger.
    /// Ignored unless the queues are merged.
    pub fn extend_lease_to(&self, lease_term: LeaseTerm) {
        if self.task_queues_are_same() || !self.is_enabled() {
            return;
        }
        self.shared.extend_lease_to(self.id, lease_term);
    }

    /// Take one frame off this merger's term.
    ///
    /// Returns whether every caller sharing the coordinator is now at zero.
    pub fn decrement_lease(&self) -> bool {
        if self.task_queues_are_same() || !self.is_enabled() {
            return false;
        }
        self.shared.decrement_lease(self.id)
    }

    /// Reclaim this merger's lease and unmerge if no other caller holds one.
    ///
    /// Returns `Ok(true)` when this call unmerged the queues, in which case
    /// the merge/unmerge callback has run.
    pub fn unmerge_now_if_last_one(&self) -> Result<bool> {
        if self.task_queues_are_same() || !self.is_enabled() {
            return Ok(false);
        }
        let unmerged = self.shared.unmerge_now_if_last_one(self.id)?;
        if unmerged {
            self.run_callback();
        }
        Ok(unmerged)
    }

    /// Per-frame bookkeeping: decrement this merger's term and, once it has
    /// run out, reclaim the lease and unmerge if no other caller holds one.
    pub fn decrement_lease_status(&self) -> Result<RasterThreadStatus> {
        if self.task_queues_are_same() {
            return Ok(RasterThreadStatus::RemainsMerged);
        }
        if !self.shared.is_merged() {
            return Ok(RasterThreadStatus::RemainsUnmerged);
        }
        if !self.is_enabled() {
            return Ok(RasterThreadStatus::RemainsMerged);
        }
        match self.shared.lease_term(self.id) {
            // Another call site holds the merge; nothing of ours to count down.
            None => return Ok(RasterThreadStatus::RemainsMerged),
            Some(0) => {}
            Some(_) => {
                self.shared.decrement_lease(self.id);
            }
        }
        if self.shared.lease_term(self.id) == Some(0) && self.unmerge_now_if_last_one()? {
            return Ok(RasterThreadStatus::UnmergedNow);
        }
        Ok(RasterThreadStatus::RemainsMerged)
    }

    /// Whether the raster queue currently runs on the platform thread.
    pub fn is_merged(&self) -> bool {
        self.task_queues_are_same() || self.shared.is_merged()
    }

    /// This merger's remaining term, or `None` if it holds no lease.
    pub fn lease_term(&self) -> Option<LeaseTerm> {
        self.shared.lease_term(self.id)
    }

    /// Block until the queues are merged.
    ///
    /// Refuses to wait (returning the current state) on the raster thread
    /// while unmerged, since only that thread's own work could merge them.
    pub fn wait_until_merged(&self) -> bool {
        if self.task_queues_are_same() {
            return true;
        }
        if self.waiting_would_deadlock() {
            return false;
        }
        self.shared.wait_until_merged();
        true
    }

    /// Like [`wait_until_merged`](Self::wait_until_merged) but gives up
    /// after `timeout`. Returns whether the queues are merged.
    pub fn wait_until_merged_timeout(&self, timeout: Duration) -> bool {
        if self.task_queues_are_same() {
            return true;
        }
        if self.waiting_would_deadlock() {
            return false;
        }
        self.shared.wait_until_merged_timeout(timeout)
    }

    /// [`wait_until_merged_timeout`](Self::wait_until_merged_timeout) with
    /// the configured timeout.
    pub fn wait_until_merged_default(&self) -> bool {
        self.wait_until_merged_timeout(self.config.merge_wait_timeout())
    }

    fn waiting_would_deadlock(&self) -> bool {
        if !self.shared.is_merged() && self.is_on_raster_queue_thread() {
            warn!(caller = %self.id, "wait_until_merged called on the raster thread; not waiting");
            return true;
        }
        false
    }

    fn is_on_raster_queue_thread(&self) -> bool {
        !self.is_on_platform_thread()
            && self
                .shared
                .task_queues()
                .runs_tasks_on_current_thread(self.raster_queue_id)
    }

    /// Whether the calling thread is the platform thread.
    pub fn is_on_platform_thread(&self) -> bool {
        self.shared
            .task_queues()
            .runs_tasks_on_current_thread(self.platform_queue_id)
    }

    /// Whether the calling thread is the one currently running raster
    /// tasks: the platform thread while merged, the raster thread otherwise.
    pub fn is_on_rasterizing_thread(&self) -> bool {
        if self.is_merged() {
            self.is_on_platform_thread()
        } else {
            self.is_on_raster_queue_thread()
        }
    }

    /// Let this merger take part in merging again.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        debug!(caller = %self.id, "merger enabled");
    }

    /// Make this merger ignore merge, extend, decrement and unmerge
    /// requests. A lease already held stays in place.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        debug!(caller = %self.id, "merger disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Run `callback` after every merge or unmerge performed through this
    /// merger. Replaces any previous callback.
    pub fn set_merge_unmerge_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    fn run_callback(&self) {
        // Cloned out so the callback may call back into this merger.
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Drop for RasterThreadMerger {
    fn drop(&mut self) {
        if let Some(term) = self.shared.lease_term(self.id) {
            warn!(caller = %self.id, remaining = term, "merger dropped while holding a lease");
        }
    }
}

impl fmt::Debug for RasterThreadMerger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterThreadMerger")
            .field("id", &self.id)
            .field("platform_queue_id", &self.platform_queue_id)
            .field("raster_queue_id", &self.raster_queue_id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
