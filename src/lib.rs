//! NSQ Exporter - Liveness-Windowed Cluster Metrics
//!
//! Republishes the status of an NSQ cluster (nsqd nodes, topics, channels)
//! as Prometheus gauges, and forgets every entity that stops reporting for
//! longer than its time-to-live so stale label sets do not linger.
//!
//! # Architecture
//!
//! ```text
//! NsqClusterObserver ──▶ ObservationRouter ──▶ Ledgers + PrometheusSink ──▶ /metrics
//!                                                   ▲
//!                                          Janitor ─┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Prometheus sink, in-memory sink and the NSQ HTTP poller
//! - [`config`] - TTLs, janitor period and the ephemeral filter
//! - [`domain`] - Entity keys, observations and the port traits
//! - [`error`] - Error types
//! - [`liveness`] - Ledgers, observation router and janitor
//! - [`server`] - Scrape endpoint and probes

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod liveness;
pub mod server;

// Re-export commonly used types
pub use adapters::{InMemorySink, NsqClusterObserver, ObserverConfig, PrometheusSink};
pub use config::{EphemeralFilter, ExporterConfig};
pub use domain::{ClusterObserver, MetricSink, Observation};
pub use error::{Error, Result};
pub use liveness::{Janitor, LivenessContext, ObservationRouter};
