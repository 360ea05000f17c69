//! Observation Router
//!
//! Turns observations into ledger touches and metric writes. Ephemeral topics
//! and channels are dropped before either happens.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::context::LivenessContext;
use crate::domain::{
    CounterMetric, LabeledGauge, NodeIdentity, NodeStats, Observation, TopicChannelKey,
    TopicMeta, TopicNodeKey,
};

/// Applies observations to the liveness context
#[derive(Debug, Clone)]
pub struct ObservationRouter {
    ctx: Arc<LivenessContext>,
}

impl ObservationRouter {
    pub fn new(ctx: Arc<LivenessContext>) -> Self {
        Self { ctx }
    }

    /// Handle one observation at the current time.
    pub fn handle(&self, observation: Observation) {
        self.handle_at(observation, Instant::now());
    }

    /// Handle one observation as if it arrived at `now`.
    pub fn handle_at(&self, observation: Observation, now: Instant) {
        trace!(
            event = observation.event_type(),
            payload = %serde_json::to_string(&observation).unwrap_or_default(),
            "Routing observation"
        );

        match observation {
            Observation::Ready => self.on_ready(),
            Observation::Error { message } => self.on_error(&message),
            Observation::Status { stats, node } => self.on_status(&stats, &node, now),
            Observation::TopicDepth {
                topic,
                depth,
                meta,
                node,
            } => self.on_topic_depth(&topic, depth, meta, &node, now),
            Observation::TopicChannelDepth {
                topic, channels, ..
            } => self.on_topic_channel_depth(&topic, &channels, now),
        }
    }

    /// Consume observations until the stream closes or `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(self, mut events: mpsc::Receiver<Observation>, shutdown: CancellationToken) {
        info!("Starting observation router");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Observation router shutting down");
                    break;
                }

                observation = events.recv() => match observation {
                    Some(observation) => self.handle(observation),
                    None => {
                        warn!("Observation stream closed");
                        break;
                    }
                }
            }
        }
    }

    fn on_ready(&self) {
        info!("Cluster observer finished initial lookupd sync");
        self.ctx.mark_ready();
    }

    fn on_error(&self, message: &str) {
        error!(error = %message, "Cluster observer error");

        if let Err(e) = self.ctx.sink().inc_counter(CounterMetric::WatcherErrors) {
            warn!(error = %e, "Failed to count observer error");
        }
    }

    fn on_status(&self, stats: &NodeStats, node: &NodeIdentity, now: Instant) {
        let mut ledgers = self.ctx.lock();

        if ledgers.nodes.touch(node.key(), now) {
            debug!(node = %node, version = %stats.version, "New nsqd node");
        }
        self.ctx.sync_node_count(&ledgers);
    }

    fn on_topic_depth(
        &self,
        topic: &str,
        depth: u64,
        meta: TopicMeta,
        node: &NodeIdentity,
        now: Instant,
    ) {
        if self.ctx.config().ephemeral.matches(topic) {
            trace!(topic, "Skipping ephemeral topic");
            return;
        }

        let key = TopicNodeKey::new(topic, node.key());
        let labels = key.label_values();
        let sink = self.ctx.sink();

        let mut ledgers = self.ctx.lock();
        ledgers.topics.touch(key.clone(), now);

        if let Err(e) = sink.set_gauge(LabeledGauge::TopicDepth, &labels, depth) {
            warn!(key = %key, error = %e, "Failed to set topic depth");
        }
        if let Err(e) = sink.set_gauge(LabeledGauge::TopicMessageCount, &labels, meta.message_count)
        {
            warn!(key = %key, error = %e, "Failed to set topic message count");
        }
    }

    fn on_topic_channel_depth(&self, topic: &str, channels: &HashMap<String, u64>, now: Instant) {
        let filter = &self.ctx.config().ephemeral;
        if filter.matches(topic) {
            trace!(topic, "Skipping ephemeral topic");
            return;
        }

        let sink = self.ctx.sink();
        let mut ledgers = self.ctx.lock();

        for (channel, depth) in channels {
            if filter.matches(channel) {
                trace!(topic, channel = %channel, "Skipping ephemeral channel");
                continue;
            }

            let key = TopicChannelKey::new(topic, channel.as_str());
            if let Err(e) = sink.set_gauge(LabeledGauge::ChannelDepth, &key.label_values(), *depth)
            {
                warn!(key = %key, error = %e, "Failed to set channel depth");
            }
            ledgers.channels.touch(key, now);
        }
    }
}
