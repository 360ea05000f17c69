//! Liveness Core
//!
//! Tracks when each broker node, topic-on-node and topic/channel combination
//! was last observed, mirrors observations into the metric sink and retracts
//! series for entities that went silent.
//!
//! ```text
//! Observation ──▶ ObservationRouter ──▶ LivenessLedger (×3) + MetricSink
//!                                              ▲
//!                         Janitor (every N s) ─┘  evicts + removes series
//! ```

mod context;
mod janitor;
mod ledger;
mod router;

#[cfg(test)]
mod proptest;

pub use context::{Ledgers, LivenessContext};
pub use janitor::{Janitor, SweepReport};
pub use ledger::LivenessLedger;
pub use router::ObservationRouter;
