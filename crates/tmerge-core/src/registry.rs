//! One coordinator per queue pair.
//!
//! [`MergerRegistry`] hands out [`RasterThreadMerger`]s that share a single
//! [`SharedThreadMerger`] for the same (platform, raster) pair, so
//! unrelated call sites lease one merge instead of fighting over two. The
//! registry only holds weak references: a coordinator lives as long as the
//! longest-lived merger using it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::debug;

use tmerge_queues::TaskQueues;
use tmerge_types::QueueId;

use crate::config::MergerConfig;
use crate::raster::RasterThreadMerger;
use crate::shared::SharedThreadMerger;

type QueuePair = (QueueId, QueueId);

/// Registry of shared coordinators keyed on (platform, raster) queue ids.
pub struct MergerRegistry {
    task_queues: Arc<dyn TaskQueues>,
    config: MergerConfig,
    mergers: Mutex<HashMap<QueuePair, Weak<SharedThreadMerger>>>,
}

impl MergerRegistry {
    pub fn new(task_queues: Arc<dyn TaskQueues>) -> Self {
        Self::with_config(task_queues, MergerConfig::default())
    }

    pub fn with_config(task_queues: Arc<dyn TaskQueues>, config: MergerConfig) -> Self {
        Self {
            task_queues,
            config,
            mergers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<QueuePair, Weak<SharedThreadMerger>>> {
        self.mergers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// The live coordinator for the pair, created on first use.
    pub fn shared_merger(&self, platform: QueueId, raster: QueueId) -> Arc<SharedThreadMerger> {
        let mut mergers = self.lock();
        if let Some(existing) = mergers.get(&(platform, raster)).and_then(Weak::upgrade) {
            return existing;
        }
        let shared = Arc::new(SharedThreadMerger::new(
            platform,
            raster,
            self.task_queues.clone(),
        ));
        mergers.insert((platform, raster), Arc::downgrade(&shared));
        debug!(platform = %platform, raster = %raster, "thread merger created");
        shared
    }

    /// A new call-site merger for the pair, sharing its coordinator with
    /// every other live merger for the same pair.
    pub fn merger(&self, platform: QueueId, raster: QueueId) -> RasterThreadMerger {
        RasterThreadMerger::with_shared(self.shared_merger(platform, raster), &self.config)
    }

    /// Drop entries whose coordinator is gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut mergers = self.lock();
        let before = mergers.len();
        mergers.retain(|_, weak| weak.strong_count() > 0);
        before - mergers.len()
    }

    /// Number of queue pairs with a live coordinator.
    pub fn live_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for MergerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergerRegistry")
            .field("config", &self.config)
            .field("live", &self.live_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTaskQueues;
    use std::thread;
    use tmerge_types::RasterThreadStatus;

    fn registry() -> (Arc<RecordingTaskQueues>, MergerRegistry) {
        let queues = Arc::new(RecordingTaskQueues::new());
        (queues.clone(), MergerRegistry::new(queues))
    }

    fn pair() -> (QueueId, QueueId) {
        (QueueId::from_raw(1), QueueId::from_raw(2))
    }

    #[test]
    fn same_pair_shares_coordinator() {
        let (_queues, registry) = registry();
        let (p, r) = pair();
        let a = registry.merger(p, r);
        let b = registry.merger(p, r);
        assert!(Arc::ptr_eq(a.shared_merger(), b.shared_merger()));
        assert_ne!(a.caller_id(), b.caller_id());
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn different_pairs_get_different_coordinators() {
        let (_queues, registry) = registry();
        let a = registry.merger(QueueId::from_raw(1), QueueId::from_raw(2));
        let b = registry.merger(QueueId::from_raw(1), QueueId::from_raw(3));
        assert!(!Arc::ptr_eq(a.shared_merger(), b.shared_merger()));
        assert_eq!(registry.live_count(), 2);
    }

    #[test]
    fn coordinator_dies_with_last_merger() {
        let (_queues, registry) = registry();
        let (p, r) = pair();
        let first = registry.shared_merger(p, r);
        let weak = Arc::downgrade(&first);
        drop(first);

        assert!(weak.upgrade().is_none());
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.prune(), 1);
        assert_eq!(registry.prune(), 0);

        let _fresh = registry.merger(p, r);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn registry_config_reaches_mergers() {
        let queues = Arc::new(RecordingTaskQueues::new());
        let registry = MergerRegistry::with_config(
            queues,
            MergerConfig {
                default_lease_term: 4,
                ..MergerConfig::default()
            },
        );
        let (p, r) = pair();
        let merger = registry.merger(p, r);
        merger.merge_with_default_lease().unwrap();
        assert_eq!(merger.lease_term(), Some(4));
        while merger.decrement_lease_status().unwrap() != RasterThreadStatus::UnmergedNow {}
    }

    #[test]
    fn call_sites_on_many_threads_merge_and_unmerge_once() {
        let (queues, registry) = registry();
        let registry = Arc::new(registry);
        let (p, r) = pair();
        // Hold the coordinator so every thread shares one episode.
        let anchor = registry.shared_merger(p, r);
        let barrier = Arc::new(std::sync::Barrier::new(6));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let merger = registry.merger(p, r);
                    merger.merge_with_lease(i + 1).unwrap();
                    barrier.wait();
                    let mut unmerged = 0;
                    loop {
                        match merger.decrement_lease_status().unwrap() {
                            RasterThreadStatus::UnmergedNow => unmerged += 1,
                            RasterThreadStatus::RemainsMerged => {}
                            RasterThreadStatus::RemainsUnmerged => break,
                        }
                        if merger.lease_term().is_none() {
                            break;
                        }
                    }
                    unmerged
                })
            })
            .collect();

        let unmerges: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(unmerges, 1);
        assert!(!anchor.is_merged());
        assert_eq!(queues.merges(), 1);
        assert_eq!(queues.unmerges(), 1);
    }
}
