//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the value objects the liveness core works with and the
//! two seams it talks through: the [`MetricSink`] it writes gauges into and the
//! [`ClusterObserver`] that feeds it observations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Liveness Core                           │
//! │        Ledger  ◀──  ObservationRouter  ──▶  Janitor          │
//! └─────────────────────────────────────────────────────────────┘
//!           ▲                                     │
//!           │ ClusterObserver                     │ MetricSink
//!           │                                     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │      NsqClusterObserver     │  PrometheusSink │ InMemorySink │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::Observation;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Identity of an nsqd node as advertised by nsqlookupd.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Address other cluster members use to reach the node
    pub broadcast_address: String,
    /// Port of the node's HTTP API
    pub http_port: u16,
}

impl NodeIdentity {
    pub fn new(broadcast_address: impl Into<String>, http_port: u16) -> Self {
        Self {
            broadcast_address: broadcast_address.into(),
            http_port,
        }
    }

    /// Ledger key for this node.
    pub fn key(&self) -> NodeKey {
        NodeKey(self.to_string())
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.broadcast_address, self.http_port)
    }
}

/// Node key, rendered as `address:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub String);

impl NodeKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A topic on one node that has no consuming channel there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicNodeKey {
    pub topic: String,
    pub node: NodeKey,
}

impl TopicNodeKey {
    pub fn new(topic: impl Into<String>, node: NodeKey) -> Self {
        Self {
            topic: topic.into(),
            node,
        }
    }

    /// Label values in `{topic, node}` order.
    pub fn label_values(&self) -> [&str; 2] {
        [&self.topic, self.node.as_str()]
    }
}

impl fmt::Display for TopicNodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.topic, self.node)
    }
}

/// A topic/channel combination, aggregated across nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicChannelKey {
    pub topic: String,
    pub channel: String,
}

impl TopicChannelKey {
    pub fn new(topic: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            channel: channel.into(),
        }
    }

    /// Label values in `{topic, channel}` order.
    pub fn label_values(&self) -> [&str; 2] {
        [&self.topic, &self.channel]
    }
}

impl fmt::Display for TopicChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.topic, self.channel)
    }
}

// =============================================================================
// Metric Definitions
// =============================================================================

/// Gauges without labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnlabeledGauge {
    /// Number of nsqd nodes currently in the node ledger
    NodeCount,
}

impl UnlabeledGauge {
    pub const ALL: [UnlabeledGauge; 1] = [UnlabeledGauge::NodeCount];

    pub fn name(&self) -> &'static str {
        match self {
            UnlabeledGauge::NodeCount => "cluster_node_count",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            UnlabeledGauge::NodeCount => "The amount of active nsqd nodes in our cluster",
        }
    }
}

/// Gauges carrying a label set derived from an entity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabeledGauge {
    TopicDepth,
    TopicMessageCount,
    ChannelDepth,
}

impl LabeledGauge {
    pub const ALL: [LabeledGauge; 3] = [
        LabeledGauge::TopicDepth,
        LabeledGauge::TopicMessageCount,
        LabeledGauge::ChannelDepth,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LabeledGauge::TopicDepth => "topic_depth",
            LabeledGauge::TopicMessageCount => "topic_message_count",
            LabeledGauge::ChannelDepth => "channel_depth",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            LabeledGauge::TopicDepth => {
                "Depth of a topic on a specific nsqd that has no channel to receive published messages"
            }
            LabeledGauge::TopicMessageCount => {
                "Message count of a topic on a specific nsqd that has no channel"
            }
            LabeledGauge::ChannelDepth => {
                "Depth of a channel in a topic, summed across all nsqd nodes"
            }
        }
    }

    pub fn label_names(&self) -> &'static [&'static str] {
        match self {
            LabeledGauge::TopicDepth | LabeledGauge::TopicMessageCount => &["topic", "node"],
            LabeledGauge::ChannelDepth => &["topic", "channel"],
        }
    }
}

/// Monotonic counters without labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterMetric {
    /// Errors reported by the cluster observer since startup
    WatcherErrors,
}

impl CounterMetric {
    pub fn name(&self) -> &'static str {
        match self {
            CounterMetric::WatcherErrors => "watcher_error_count",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            CounterMetric::WatcherErrors => {
                "The amount of errors the cluster observer fired since the process started"
            }
        }
    }
}

// =============================================================================
// Metric Sink Port
// =============================================================================

/// Port for writing metric values into a metrics backend.
///
/// Implementations are pure pass-through: they hold the metric definitions
/// declared at construction and no other state. Every write is in-memory, so
/// the methods are synchronous.
pub trait MetricSink: Send + Sync {
    /// Set a labeled gauge series, creating it if needed.
    fn set_gauge(&self, gauge: LabeledGauge, labels: &[&str], value: u64) -> Result<()>;

    /// Increment an unlabeled counter by one.
    fn inc_counter(&self, counter: CounterMetric) -> Result<()>;

    /// Drop a labeled series so it no longer appears in exported output.
    fn remove_series(&self, gauge: LabeledGauge, labels: &[&str]) -> Result<()>;

    /// Set an unlabeled gauge.
    fn set_unlabeled_gauge(&self, gauge: UnlabeledGauge, value: u64) -> Result<()>;
}

// =============================================================================
// Cluster Observer Port
// =============================================================================

/// Port for the component that discovers and polls cluster nodes.
///
/// An observer pushes typed [`Observation`]s into `events` until `shutdown`
/// is cancelled or the receiving side goes away.
#[async_trait]
pub trait ClusterObserver: Send + Sync {
    async fn run(
        &self,
        events: mpsc::Sender<Observation>,
        shutdown: CancellationToken,
    ) -> Result<()>;
}
