//! Domain Layer
//!
//! # Architecture
//!
//! The domain layer is organized into:
//!
//! - **Ports** (`ports.rs`) - Entity keys, metric definitions and the traits
//!   for the metrics backend and the cluster observer
//! - **Events** (`events.rs`) - Observations delivered by the cluster observer
//!
//! # Usage
//!
//! ```ignore
//! use nsq_exporter::domain::{MetricSink, Observation};
//!
//! fn feed<S: MetricSink>(sink: &S, obs: Observation) { /* ... */ }
//! ```

pub mod events;
pub mod ports;

pub use events::{NodeStats, Observation, TopicMeta};
pub use ports::{
    // Port traits
    ClusterObserver,
    // Metric definitions
    CounterMetric,
    LabeledGauge,
    MetricSink,
    // Value objects
    NodeIdentity,
    NodeKey,
    TopicChannelKey,
    TopicNodeKey,
    UnlabeledGauge,
};
