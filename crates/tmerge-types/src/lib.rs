//! Foundation types for tmerge.
//!
//! Every other tmerge crate depends on `tmerge-types`.
//!
//! # Key Types
//!
//! - [`QueueId`] — Opaque identifier of a task queue
//! - [`CallerId`] — Process-unique identity of a merge call site
//! - [`LeaseTerm`] — Remaining merged-execution units owed to a caller
//! - [`RasterThreadStatus`] — Outcome of a frame-loop lease decrement

pub mod error;
pub mod identity;
pub mod status;

pub use error::TypeError;
pub use identity::{CallerId, QueueId};
pub use status::{LeaseTerm, RasterThreadStatus};
