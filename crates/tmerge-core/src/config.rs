use std::time::Duration;

use serde::{Deserialize, Serialize};

use tmerge_types::LeaseTerm;

/// Frames a call site keeps the queues merged for when it has no better
/// estimate. Must be at least one so a merge survives the frame that
/// requested it.
pub const DEFAULT_LEASE_TERM: LeaseTerm = 10;

/// Defaults applied by [`MergerRegistry`](crate::MergerRegistry) and the
/// mergers it hands out.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    /// Lease term used by [`merge_with_default_lease`].
    ///
    /// [`merge_with_default_lease`]: crate::RasterThreadMerger::merge_with_default_lease
    pub default_lease_term: LeaseTerm,
    /// Upper bound for [`wait_until_merged_timeout`] when callers use
    /// [`MergerConfig::merge_wait_timeout`].
    ///
    /// [`wait_until_merged_timeout`]: crate::RasterThreadMerger::wait_until_merged_timeout
    pub merge_wait_timeout_ms: u64,
    /// Whether mergers start out enabled.
    pub enabled: bool,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            default_lease_term: DEFAULT_LEASE_TERM,
            merge_wait_timeout_ms: 1_000,
            enabled: true,
        }
    }
}

impl MergerConfig {
    pub fn merge_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.merge_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = MergerConfig::default();
        assert_eq!(c.default_lease_term, 10);
        assert_eq!(c.merge_wait_timeout(), Duration::from_secs(1));
        assert!(c.enabled);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let c: MergerConfig = toml::from_str("default_lease_term = 3").unwrap();
        assert_eq!(c.default_lease_term, 3);
        assert_eq!(c.merge_wait_timeout_ms, 1_000);
        assert!(c.enabled);
    }

    #[test]
    fn toml_roundtrip() {
        let c = MergerConfig {
            default_lease_term: 4,
            merge_wait_timeout_ms: 250,
            enabled: false,
        };
        let text = toml::to_string(&c).unwrap();
        let back: MergerConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, c);
    }
}
