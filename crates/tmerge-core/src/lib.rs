//! Lease-counted thread merging for tmerge.
//!
//! This crate is the heart of tmerge. It lets two task queues (a platform
//! queue and a raster queue) be collapsed onto the platform thread for as
//! long as any call site still holds a lease on the merge, and split apart
//! again by whichever call site releases the last lease. It provides:
//! - [`SharedThreadMerger`], the per-queue-pair coordinator holding the
//!   lease ledger and performing the physical merge and unmerge
//! - [`RasterThreadMerger`], the per-call-site handle that leases the merge
//!   under its own [`CallerId`]
//! - [`MergerRegistry`], which hands out one coordinator per queue pair
//! - [`MergerConfig`] defaults for lease durations and waits
//!
//! [`CallerId`]: tmerge_types::CallerId

pub mod config;
pub mod error;
pub mod raster;
pub mod registry;
pub mod shared;

mod ledger;

#[cfg(test)]
mod testing;

pub use config::{MergerConfig, DEFAULT_LEASE_TERM};
pub use error::{MergerError, Result};
pub use raster::RasterThreadMerger;
pub use registry::MergerRegistry;
pub use shared::SharedThreadMerger;
