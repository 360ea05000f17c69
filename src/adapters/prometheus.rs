//! Prometheus Metric Sink
//!
//! Implements the `MetricSink` port on top of a dedicated `prometheus::Registry`.

use prometheus::{Encoder, IntCounter, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::domain::ports::{CounterMetric, LabeledGauge, MetricSink, UnlabeledGauge};
use crate::error::{Error, Result};

/// Default prefix prepended to every exported metric name.
pub const DEFAULT_METRICS_PREFIX: &str = "nsq";

/// Prometheus-backed metric sink.
///
/// Owns its registry instead of using the process-global one, so several
/// sinks can coexist (one per test, for instance).
pub struct PrometheusSink {
    registry: Registry,
    node_count: IntGauge,
    watcher_errors: IntCounter,
    topic_depth: IntGaugeVec,
    topic_message_count: IntGaugeVec,
    channel_depth: IntGaugeVec,
}

impl PrometheusSink {
    /// Create a sink whose metric names carry `prefix` (e.g. `nsq_topic_depth`).
    ///
    /// An empty prefix leaves the names bare.
    pub fn new(prefix: &str) -> Result<Self> {
        let prefix = Some(prefix.to_string()).filter(|p| !p.is_empty());
        let registry = Registry::new_custom(prefix, None)?;

        let node_count = IntGauge::with_opts(Opts::new(
            UnlabeledGauge::NodeCount.name(),
            UnlabeledGauge::NodeCount.help(),
        ))?;
        registry.register(Box::new(node_count.clone()))?;

        let watcher_errors = IntCounter::with_opts(Opts::new(
            CounterMetric::WatcherErrors.name(),
            CounterMetric::WatcherErrors.help(),
        ))?;
        registry.register(Box::new(watcher_errors.clone()))?;

        let topic_depth = register_gauge_vec(&registry, LabeledGauge::TopicDepth)?;
        let topic_message_count = register_gauge_vec(&registry, LabeledGauge::TopicMessageCount)?;
        let channel_depth = register_gauge_vec(&registry, LabeledGauge::ChannelDepth)?;

        Ok(Self {
            registry,
            node_count,
            watcher_errors,
            topic_depth,
            topic_message_count,
            channel_depth,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Content type of [`render`](Self::render)'s output.
    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    /// Render every registered metric in the text exposition format.
    pub fn render(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    fn labeled(&self, gauge: LabeledGauge) -> &IntGaugeVec {
        match gauge {
            LabeledGauge::TopicDepth => &self.topic_depth,
            LabeledGauge::TopicMessageCount => &self.topic_message_count,
            LabeledGauge::ChannelDepth => &self.channel_depth,
        }
    }
}

fn register_gauge_vec(registry: &Registry, gauge: LabeledGauge) -> Result<IntGaugeVec> {
    let vec = IntGaugeVec::new(Opts::new(gauge.name(), gauge.help()), gauge.label_names())?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

/// Gauges are i64; depths beyond that are pinned to the maximum.
fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl MetricSink for PrometheusSink {
    fn set_gauge(&self, gauge: LabeledGauge, labels: &[&str], value: u64) -> Result<()> {
        self.labeled(gauge)
            .get_metric_with_label_values(labels)?
            .set(clamp(value));
        Ok(())
    }

    fn inc_counter(&self, counter: CounterMetric) -> Result<()> {
        match counter {
            CounterMetric::WatcherErrors => self.watcher_errors.inc(),
        }
        Ok(())
    }

    fn remove_series(&self, gauge: LabeledGauge, labels: &[&str]) -> Result<()> {
        self.labeled(gauge)
            .remove_label_values(labels)
            .map_err(Error::from)
    }

    fn set_unlabeled_gauge(&self, gauge: UnlabeledGauge, value: u64) -> Result<()> {
        match gauge {
            UnlabeledGauge::NodeCount => self.node_count.set(clamp(value)),
        }
        Ok(())
    }
}

impl std::fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusSink")
            .field("families", &self.registry.gather().len())
            .finish()
    }
}
