//! Liveness Context
//!
//! The shared state of the liveness core: three ledgers, the metric sink and
//! the readiness flag. Constructed once and handed to the router and janitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::warn;

use super::ledger::LivenessLedger;
use crate::config::ExporterConfig;
use crate::domain::{MetricSink, NodeKey, TopicChannelKey, TopicNodeKey, UnlabeledGauge};

/// The three liveness ledgers.
#[derive(Debug)]
pub struct Ledgers {
    pub nodes: LivenessLedger<NodeKey>,
    pub topics: LivenessLedger<TopicNodeKey>,
    pub channels: LivenessLedger<TopicChannelKey>,
}

impl Ledgers {
    pub fn new(config: &ExporterConfig) -> Self {
        Self {
            nodes: LivenessLedger::new(config.node_ttl),
            topics: LivenessLedger::new(config.topic_channel_ttl),
            channels: LivenessLedger::new(config.topic_channel_ttl),
        }
    }
}

/// Shared context for the observation router and the janitor
pub struct LivenessContext {
    config: ExporterConfig,
    ledgers: Mutex<Ledgers>,
    sink: Arc<dyn MetricSink>,
    ready: AtomicBool,
}

impl LivenessContext {
    pub fn new(config: ExporterConfig, sink: Arc<dyn MetricSink>) -> Arc<Self> {
        Arc::new(Self {
            ledgers: Mutex::new(Ledgers::new(&config)),
            config,
            sink,
            ready: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    pub fn sink(&self) -> &dyn MetricSink {
        self.sink.as_ref()
    }

    /// Lock the ledgers.
    ///
    /// Hold the guard across a ledger change and its matching sink writes so
    /// the two never interleave with another mutation.
    pub fn lock(&self) -> MutexGuard<'_, Ledgers> {
        self.ledgers.lock()
    }

    /// Publish the node-count gauge from the node ledger's cardinality.
    pub fn sync_node_count(&self, ledgers: &Ledgers) {
        let count = ledgers.nodes.len() as u64;
        if let Err(e) = self
            .sink
            .set_unlabeled_gauge(UnlabeledGauge::NodeCount, count)
        {
            warn!(error = %e, "Failed to publish node count");
        }
    }

    /// Whether the observer has finished its initial directory sync.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn node_count(&self) -> usize {
        self.ledgers.lock().nodes.len()
    }

    pub fn topic_count(&self) -> usize {
        self.ledgers.lock().topics.len()
    }

    pub fn channel_count(&self) -> usize {
        self.ledgers.lock().channels.len()
    }
}

impl std::fmt::Debug for LivenessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessContext")
            .field("config", &self.config)
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemorySink;
    use tokio::time::Instant;

    #[test]
    fn test_ledgers_take_their_ttl_from_config() {
        let config = ExporterConfig::default();
        let ledgers = Ledgers::new(&config);

        assert_eq!(ledgers.nodes.ttl(), config.node_ttl);
        assert_eq!(ledgers.topics.ttl(), config.topic_channel_ttl);
        assert_eq!(ledgers.channels.ttl(), config.topic_channel_ttl);
    }

    #[test]
    fn test_sync_node_count_reflects_cardinality() {
        let sink = Arc::new(InMemorySink::new());
        let ctx = LivenessContext::new(ExporterConfig::default(), sink.clone());

        {
            let mut ledgers = ctx.lock();
            ledgers.nodes.touch(NodeKey::from("a:4151"), Instant::now());
            ledgers.nodes.touch(NodeKey::from("b:4151"), Instant::now());
            ctx.sync_node_count(&ledgers);
        }

        assert_eq!(sink.unlabeled(UnlabeledGauge::NodeCount), Some(2));
        assert_eq!(ctx.node_count(), 2);
    }

    #[test]
    fn test_readiness_flag() {
        let ctx = LivenessContext::new(ExporterConfig::default(), Arc::new(InMemorySink::new()));

        assert!(!ctx.is_ready());
        ctx.mark_ready();
        assert!(ctx.is_ready());
    }
}
