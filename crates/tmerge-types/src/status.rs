use std::fmt;

use serde::{Deserialize, Serialize};

/// Count of remaining merged-execution units owed to a caller.
///
/// "This caller still needs the queues merged for N more operations."
pub type LeaseTerm = u32;

/// Result of decrementing a lease from a frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RasterThreadStatus {
    /// The queues are still merged after the decrement.
    RemainsMerged,
    /// The queues were not merged to begin with.
    RemainsUnmerged,
    /// This decrement released the last lease and the queues were split.
    UnmergedNow,
}

impl RasterThreadStatus {
    /// Whether the raster queue is serviced by the platform thread after
    /// this status was produced.
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::RemainsMerged)
    }
}

impl fmt::Display for RasterThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RemainsMerged => "remains-merged",
            Self::RemainsUnmerged => "remains-unmerged",
            Self::UnmergedNow => "unmerged-now",
        };
        f.write_str(s)
    }
}
