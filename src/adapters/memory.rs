//! In-Memory Metric Sink
//!
//! Records metric writes in memory for later inspection during tests.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::ports::{CounterMetric, LabeledGauge, MetricSink, UnlabeledGauge};
use crate::error::{Error, Result};

type SeriesKey = (LabeledGauge, Vec<String>);

/// Metric sink that keeps every value in a map.
///
/// Enforces the same rules a real backend does: label arity must match the
/// metric's schema and removing an absent series is an error.
#[derive(Debug, Default)]
pub struct InMemorySink {
    series: RwLock<HashMap<SeriesKey, u64>>,
    unlabeled: RwLock<HashMap<UnlabeledGauge, u64>>,
    counters: RwLock<HashMap<CounterMetric, u64>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a labeled series.
    pub fn gauge(&self, gauge: LabeledGauge, labels: &[&str]) -> Option<u64> {
        self.series.read().get(&series_key(gauge, labels)).copied()
    }

    pub fn unlabeled(&self, gauge: UnlabeledGauge) -> Option<u64> {
        self.unlabeled.read().get(&gauge).copied()
    }

    pub fn counter(&self, counter: CounterMetric) -> u64 {
        self.counters.read().get(&counter).copied().unwrap_or(0)
    }

    /// Number of live series for a labeled gauge.
    pub fn series_count(&self, gauge: LabeledGauge) -> usize {
        self.series
            .read()
            .keys()
            .filter(|(name, _)| *name == gauge)
            .count()
    }
}

fn series_key(gauge: LabeledGauge, labels: &[&str]) -> SeriesKey {
    (gauge, labels.iter().map(|l| l.to_string()).collect())
}

fn check_arity(gauge: LabeledGauge, labels: &[&str]) -> Result<()> {
    let expected = gauge.label_names().len();
    if labels.len() != expected {
        return Err(Error::Internal(format!(
            "{} expects {} label values, got {}",
            gauge.name(),
            expected,
            labels.len()
        )));
    }
    Ok(())
}

impl MetricSink for InMemorySink {
    fn set_gauge(&self, gauge: LabeledGauge, labels: &[&str], value: u64) -> Result<()> {
        check_arity(gauge, labels)?;
        self.series.write().insert(series_key(gauge, labels), value);
        Ok(())
    }

    fn inc_counter(&self, counter: CounterMetric) -> Result<()> {
        *self.counters.write().entry(counter).or_insert(0) += 1;
        Ok(())
    }

    fn remove_series(&self, gauge: LabeledGauge, labels: &[&str]) -> Result<()> {
        check_arity(gauge, labels)?;
        match self.series.write().remove(&series_key(gauge, labels)) {
            Some(_) => Ok(()),
            None => Err(Error::Internal(format!(
                "no series {} {:?}",
                gauge.name(),
                labels
            ))),
        }
    }

    fn set_unlabeled_gauge(&self, gauge: UnlabeledGauge, value: u64) -> Result<()> {
        self.unlabeled.write().insert(gauge, value);
        Ok(())
    }
}
