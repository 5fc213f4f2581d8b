use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Opaque identifier of a task queue.
///
/// Queue ids are handed out by the queue layer when a queue is created and
/// stay valid for the lifetime of that queue. Two ids form the *queue pair*
/// of a thread merger: the owner (platform) and the subsumed (raster) queue.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueId(u64);

impl QueueId {
    /// Create from a raw value. The queue layer is the normal source of ids.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw integer value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueId({})", self.0)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q:{}", self.0)
    }
}

impl FromStr for QueueId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("q:").unwrap_or(s);
        digits
            .parse::<u64>()
            .map(Self)
            .map_err(|e| TypeError::InvalidQueueId(format!("{s}: {e}")))
    }
}

static NEXT_CALLER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a merge call site.
///
/// A `CallerId` is only ever used as a lease-ledger key and is never
/// dereferenced, so a caller that is dropped while still registered cannot
/// cause a dangling reference. Leaking an id without releasing its lease is
/// a caller bug: the lease pins the merge forever.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallerId(u64);

impl CallerId {
    /// Allocate a fresh, process-unique caller id.
    pub fn next() -> Self {
        Self(NEXT_CALLER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create from a raw value. Use `next()` for production code.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw integer value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallerId({})", self.0)
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "caller:{}", self.0)
    }
}
