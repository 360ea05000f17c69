//! Cluster Observations
//!
//! Observations are immutable records of what the cluster observer saw. They
//! are the only input the liveness core accepts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ports::NodeIdentity;

/// Summary of one nsqd `/stats` answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeStats {
    pub version: String,
    pub health: String,
    pub start_time: Option<DateTime<Utc>>,
    pub topic_count: usize,
}

/// Per-topic metadata reported alongside a topic depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TopicMeta {
    /// Messages published to the topic since the node started
    pub message_count: u64,
}

/// One event emitted by the cluster observer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Observation {
    /// Initial directory sync finished.
    Ready,

    /// Observer-level failure.
    Error { message: String },

    /// Heartbeat from one nsqd node.
    Status { stats: NodeStats, node: NodeIdentity },

    /// Depth of a topic on one node where it has no channel.
    TopicDepth {
        topic: String,
        depth: u64,
        meta: TopicMeta,
        node: NodeIdentity,
    },

    /// Channel depths of one topic, aggregated across nodes.
    TopicChannelDepth {
        topic: String,
        depth: u64,
        channels: HashMap<String, u64>,
    },
}

impl Observation {
    pub fn error(message: impl Into<String>) -> Self {
        Observation::Error {
            message: message.into(),
        }
    }

    /// Event name as used on the observer's event stream.
    pub fn event_type(&self) -> &'static str {
        match self {
            Observation::Ready => "ready",
            Observation::Error { .. } => "error",
            Observation::Status { .. } => "status",
            Observation::TopicDepth { .. } => "topic-depth",
            Observation::TopicChannelDepth { .. } => "topic-channel-depth",
        }
    }
}
