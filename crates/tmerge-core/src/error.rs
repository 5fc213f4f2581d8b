use tmerge_types::QueueId;

/// Errors produced by thread merger operations.
///
/// Only failures reported by the queue layer surface here. Lease protocol
/// misuse (unknown callers, zero lease terms, extending an unmerged pair)
/// is logged and ignored.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergerError {
    #[error("unable to merge {subsumed} into {owner}")]
    MergeFailed { owner: QueueId, subsumed: QueueId },

    #[error("unable to unmerge {subsumed} from {owner}")]
    UnmergeFailed { owner: QueueId, subsumed: QueueId },
}

/// Convenience alias used throughout the merger crate.
pub type Result<T> = std::result::Result<T, MergerError>;
