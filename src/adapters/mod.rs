//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │            MetricSink        │      ClusterObserver         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │  PrometheusSink │ InMemorySink │ NsqClusterObserver         │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use nsq_exporter::adapters::{NsqClusterObserver, ObserverConfig, PrometheusSink};
//!
//! let sink = Arc::new(PrometheusSink::new("nsq")?);
//! let observer = NsqClusterObserver::new(ObserverConfig::default())?;
//! ```

mod memory;
mod nsq;
mod prometheus;

pub use memory::InMemorySink;
pub use nsq::{NsqClusterObserver, ObserverConfig};
pub use prometheus::{PrometheusSink, DEFAULT_METRICS_PREFIX};
