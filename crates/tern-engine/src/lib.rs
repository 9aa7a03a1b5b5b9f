//! Core label engine.
//!
//! Ties the ordered log, the canonical codec, and the pure label semantics
//! together into the [`Labeler`]: the single mutator of the log and the
//! read surface for queries and subscriptions.
//!
//! The writer path serializes `AddLabel` calls through the store's append
//! lock while tolerating multiple in-flight writers: admissibility is
//! decided against a snapshot of the log, and a concurrent insert for the
//! same identity tuple aborts the append for a bounded retry.

mod error;
mod labeler;
mod metrics;
mod migrate;
mod semantics;


pub use error::LabelerError;
pub use labeler::{Labeler, MAX_WRITE_ATTEMPTS, QueryRequest, Subscription};
pub use metrics::{Metrics, WriteOutcome};
pub use migrate::migrate_legacy;
pub use semantics::{admissible, collapse};
