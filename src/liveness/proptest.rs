//! Property-Based Tests for the Liveness Core
//!
//! # Test Properties
//!
//! 1. **Overwrite**: the ledger keeps the latest touch, never an accumulation
//! 2. **Eviction Partition**: after a sweep, exactly the entities younger than
//!    their TTL remain, in both the ledger and the sink
//! 3. **Node Count**: the node gauge equals the node ledger's cardinality
//!    after every touch and every sweep

#![cfg(test)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use super::{Janitor, LivenessContext, LivenessLedger, ObservationRouter};
use crate::adapters::InMemorySink;
use crate::config::ExporterConfig;
use crate::domain::{
    LabeledGauge, NodeIdentity, NodeStats, Observation, TopicChannelKey, UnlabeledGauge,
};

// =============================================================================
// Property Strategies
// =============================================================================

/// Channel names paired with the seconds since they were last reported.
fn channel_ages_strategy() -> impl Strategy<Value = HashMap<String, u64>> {
    prop::collection::hash_map("[a-z]{1,8}", 0u64..300, 0..20)
}

/// A run of node heartbeats (node index, seconds offset) and sweep offsets.
#[derive(Debug, Clone)]
enum Step {
    Status { node: u8, at: u64 },
    Sweep { at: u64 },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (0u8..6, 0u64..400).prop_map(|(node, at)| Step::Status { node, at }),
        (0u64..400).prop_map(|at| Step::Sweep { at }),
    ]
}

fn setup(config: ExporterConfig) -> (Arc<LivenessContext>, Arc<InMemorySink>) {
    let sink = Arc::new(InMemorySink::new());
    let ctx = LivenessContext::new(config, sink.clone());
    (ctx, sink)
}

// =============================================================================
// Ledger Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: after any series of touches the ledger reports the latest one.
    #[test]
    fn prop_touch_keeps_latest(offsets in prop::collection::vec(0u64..10_000, 1..50)) {
        let base = Instant::now();
        let mut ledger = LivenessLedger::new(Duration::from_secs(60));

        for offset in &offsets {
            ledger.touch("key", base + Duration::from_millis(*offset));
        }

        let latest = offsets.iter().max().copied().unwrap_or_default();
        prop_assert_eq!(ledger.len(), 1);
        prop_assert_eq!(
            ledger.last_seen(&"key"),
            Some(base + Duration::from_millis(latest))
        );
    }

    /// Property: a sweep keeps exactly the channels younger than the TTL, and
    /// the sink carries a series for exactly those channels.
    #[test]
    fn prop_sweep_partitions_by_age(
        ages in channel_ages_strategy(),
        ttl_secs in 1u64..300,
    ) {
        let config = ExporterConfig {
            topic_channel_ttl: Duration::from_secs(ttl_secs),
            ..Default::default()
        };
        let (ctx, sink) = setup(config);
        let router = ObservationRouter::new(ctx.clone());
        let now = Instant::now() + Duration::from_secs(1_000);

        for (channel, age) in &ages {
            router.handle_at(
                Observation::TopicChannelDepth {
                    topic: "orders".to_string(),
                    depth: 1,
                    channels: HashMap::from([(channel.clone(), 1)]),
                },
                now - Duration::from_secs(*age),
            );
        }

        Janitor::new(ctx.clone()).tick_at(now);

        let ledgers = ctx.lock();
        for (channel, age) in &ages {
            let key = TopicChannelKey::new("orders", channel.as_str());
            let alive = *age < ttl_secs;
            prop_assert_eq!(ledgers.channels.contains(&key), alive);
            prop_assert_eq!(
                sink.gauge(LabeledGauge::ChannelDepth, &key.label_values()).is_some(),
                alive
            );
        }
        prop_assert_eq!(sink.series_count(LabeledGauge::ChannelDepth), ledgers.channels.len());
    }

    /// Property: the node gauge never drifts from the node ledger.
    #[test]
    fn prop_node_count_tracks_cardinality(steps in prop::collection::vec(step_strategy(), 1..60)) {
        let (ctx, sink) = setup(ExporterConfig::default());
        let router = ObservationRouter::new(ctx.clone());
        let janitor = Janitor::new(ctx.clone());
        let base = Instant::now();

        for step in steps {
            match step {
                Step::Status { node, at } => router.handle_at(
                    Observation::Status {
                        stats: NodeStats::default(),
                        node: NodeIdentity::new(format!("10.0.0.{}", node), 4151),
                    },
                    base + Duration::from_secs(at),
                ),
                Step::Sweep { at } => {
                    janitor.tick_at(base + Duration::from_secs(at));
                }
            }

            prop_assert_eq!(
                sink.unlabeled(UnlabeledGauge::NodeCount),
                Some(ctx.node_count() as u64)
            );
        }
    }
}
