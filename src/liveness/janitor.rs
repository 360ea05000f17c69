//! Janitor
//!
//! Periodically drops entities that stopped reporting, together with the
//! metric series they own.

use std::sync::Arc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::context::LivenessContext;
use crate::domain::LabeledGauge;

/// Number of entities evicted by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub nodes: usize,
    pub channels: usize,
    pub topics: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.nodes + self.channels + self.topics
    }
}

/// Evicts expired ledger entries and retracts their series
#[derive(Debug, Clone)]
pub struct Janitor {
    ctx: Arc<LivenessContext>,
}

impl Janitor {
    pub fn new(ctx: Arc<LivenessContext>) -> Self {
        Self { ctx }
    }

    /// Sweep at the current time.
    pub fn tick(&self) -> SweepReport {
        self.tick_at(Instant::now())
    }

    /// Sweep all three ledgers as of `now`.
    ///
    /// Each eviction removes the ledger entry and its series under one lock.
    /// A sink failure for one entity is logged and the sweep moves on.
    pub fn tick_at(&self, now: Instant) -> SweepReport {
        let sink = self.ctx.sink();
        let mut ledgers = self.ctx.lock();
        let mut report = SweepReport::default();

        // Nodes own no labeled series, only the cardinality gauge.
        let expired_nodes = ledgers.nodes.expired_keys(now);
        if !expired_nodes.is_empty() {
            info!(nodes = ?expired_nodes, "Deleting timed out nodes");
        }
        for key in &expired_nodes {
            ledgers.nodes.remove(key);
        }
        report.nodes = expired_nodes.len();
        self.ctx.sync_node_count(&ledgers);

        let expired_channels = ledgers.channels.expired_keys(now);
        if !expired_channels.is_empty() {
            info!(channels = ?expired_channels, "Deleting timed out channels");
        }
        for key in &expired_channels {
            ledgers.channels.remove(key);
            if let Err(e) = sink.remove_series(LabeledGauge::ChannelDepth, &key.label_values()) {
                warn!(key = %key, error = %e, "Failed to remove channel depth series");
            }
        }
        report.channels = expired_channels.len();

        let expired_topics = ledgers.topics.expired_keys(now);
        if !expired_topics.is_empty() {
            info!(topics = ?expired_topics, "Deleting timed out topics");
        }
        for key in &expired_topics {
            ledgers.topics.remove(key);
            let labels = key.label_values();
            for gauge in [LabeledGauge::TopicDepth, LabeledGauge::TopicMessageCount] {
                if let Err(e) = sink.remove_series(gauge, &labels) {
                    warn!(key = %key, gauge = gauge.name(), error = %e, "Failed to remove topic series");
                }
            }
        }
        report.topics = expired_topics.len();

        report
    }

    /// Run the sweep loop until `shutdown` fires.
    ///
    /// Ticks that fall behind are skipped, never queued.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        let period = self.ctx.config().janitor_interval;
        info!(period_secs = period.as_secs(), "Starting janitor");

        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Janitor shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let report = self.tick();
                    if report.total() > 0 {
                        debug!(?report, "Janitor sweep finished");
                    }
                }
            }
        }
    }
}
