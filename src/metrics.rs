// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! Per-transaction metric statistics.
//!
//! One [`MetricStatsCollection`] is built per finished transaction and
//! handed to the metric aggregator in a single batch. Scoped metrics are
//! attributed to the transaction's final name; unscoped metrics roll up
//! across transactions.

use std::collections::HashMap;
use std::time::Duration;

use crate::name::TransactionMetricName;

/// Aggregated timing of one named operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricStats {
    pub call_count: u64,
    pub total: Duration,
    pub exclusive: Duration,
    pub min: Duration,
    pub max: Duration,
    pub sum_of_squares: f64,
}

impl MetricStats {
    pub fn record(&mut self, duration: Duration, exclusive: Duration) {
        if self.call_count == 0 || duration < self.min {
            self.min = duration;
        }
        if duration > self.max {
            self.max = duration;
        }
        self.call_count += 1;
        self.total += duration;
        self.exclusive += exclusive;
        self.sum_of_squares += duration.as_secs_f64() * duration.as_secs_f64();
    }

    pub fn merge(&mut self, other: &MetricStats) {
        if other.call_count == 0 {
            return;
        }
        if self.call_count == 0 || other.min < self.min {
            self.min = other.min;
        }
        if other.max > self.max {
            self.max = other.max;
        }
        self.call_count += other.call_count;
        self.total += other.total;
        self.exclusive += other.exclusive;
        self.sum_of_squares += other.sum_of_squares;
    }
}

/// Apdex bucket counts for one transaction name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApdexStats {
    pub satisfying: u64,
    pub tolerating: u64,
    pub frustrating: u64,
}

impl ApdexStats {
    /// Buckets one response time against the apdex threshold.
    pub fn record(&mut self, response_time: Duration, apdex_t: Duration) {
        if response_time <= apdex_t {
            self.satisfying += 1;
        } else if response_time <= apdex_t * 4 {
            self.tolerating += 1;
        } else {
            self.frustrating += 1;
        }
    }

    pub fn record_frustrated(&mut self) {
        self.frustrating += 1;
    }
}

/// The statistics batch built while transforming one transaction.
#[derive(Debug, Clone)]
pub struct MetricStatsCollection {
    transaction_name: TransactionMetricName,
    unscoped: HashMap<String, MetricStats>,
    scoped: HashMap<String, MetricStats>,
    apdex: HashMap<String, ApdexStats>,
}

impl MetricStatsCollection {
    pub fn new(transaction_name: TransactionMetricName) -> Self {
        MetricStatsCollection {
            transaction_name,
            unscoped: HashMap::new(),
            scoped: HashMap::new(),
            apdex: HashMap::new(),
        }
    }

    /// The scope every scoped metric in this batch is attributed to.
    #[inline]
    pub fn transaction_name(&self) -> &TransactionMetricName {
        &self.transaction_name
    }

    pub fn record_scoped(
        &mut self,
        name: impl Into<String>,
        duration: Duration,
        exclusive: Duration,
    ) {
        self.scoped
            .entry(name.into())
            .or_default()
            .record(duration, exclusive);
    }

    pub fn record_unscoped(
        &mut self,
        name: impl Into<String>,
        duration: Duration,
        exclusive: Duration,
    ) {
        self.unscoped
            .entry(name.into())
            .or_default()
            .record(duration, exclusive);
    }

    /// Records a pure count, for rollups like `Errors/all`.
    pub fn record_unscoped_count(&mut self, name: impl Into<String>) {
        let stats = self.unscoped.entry(name.into()).or_default();
        stats.call_count += 1;
    }

    pub fn record_apdex(&mut self, name: impl Into<String>, response_time: Duration, apdex_t: Duration) {
        self.apdex
            .entry(name.into())
            .or_default()
            .record(response_time, apdex_t);
    }

    pub fn record_frustrated_apdex(&mut self, name: impl Into<String>) {
        self.apdex.entry(name.into()).or_default().record_frustrated();
    }

    pub fn unscoped(&self, name: &str) -> Option<&MetricStats> {
        self.unscoped.get(name)
    }

    pub fn scoped(&self, name: &str) -> Option<&MetricStats> {
        self.scoped.get(name)
    }

    pub fn apdex(&self, name: &str) -> Option<&ApdexStats> {
        self.apdex.get(name)
    }

    pub fn unscoped_iter(&self) -> impl Iterator<Item = (&str, &MetricStats)> {
        self.unscoped.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    pub fn scoped_iter(&self) -> impl Iterator<Item = (&str, &MetricStats)> {
        self.scoped.iter().map(|(name, stats)| (name.as_str(), stats))
    }

    pub fn is_empty(&self) -> bool {
        self.unscoped.is_empty() && self.scoped.is_empty() && self.apdex.is_empty()
    }

    pub fn len(&self) -> usize {
        self.unscoped.len() + self.scoped.len() + self.apdex.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::TransactionName;

    fn collection() -> MetricStatsCollection {
        MetricStatsCollection::new(TransactionMetricName::new(&TransactionName::web(
            "MVC",
            "Home/Index",
        )))
    }

    #[test]
    fn stats_track_min_max_total() {
        let mut stats = MetricStats::default();
        stats.record(Duration::from_millis(10), Duration::from_millis(8));
        stats.record(Duration::from_millis(30), Duration::from_millis(30));
        stats.record(Duration::from_millis(20), Duration::from_millis(5));

        assert_eq!(stats.call_count, 3);
        assert_eq!(stats.total, Duration::from_millis(60));
        assert_eq!(stats.exclusive, Duration::from_millis(43));
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(30));
    }

    #[test]
    fn merge_combines_extremes() {
        let mut a = MetricStats::default();
        a.record(Duration::from_millis(10), Duration::from_millis(10));
        let mut b = MetricStats::default();
        b.record(Duration::from_millis(2), Duration::from_millis(2));
        b.record(Duration::from_millis(50), Duration::from_millis(50));

        a.merge(&b);
        assert_eq!(a.call_count, 3);
        assert_eq!(a.min, Duration::from_millis(2));
        assert_eq!(a.max, Duration::from_millis(50));
        assert_eq!(a.total, Duration::from_millis(62));
    }

    #[test]
    fn apdex_bucketing() {
        let mut apdex = ApdexStats::default();
        let t = Duration::from_millis(100);
        apdex.record(Duration::from_millis(80), t); // satisfying
        apdex.record(Duration::from_millis(100), t); // satisfying, boundary
        apdex.record(Duration::from_millis(250), t); // tolerating
        apdex.record(Duration::from_millis(401), t); // frustrating

        assert_eq!(apdex.satisfying, 2);
        assert_eq!(apdex.tolerating, 1);
        assert_eq!(apdex.frustrating, 1);
    }

    #[test]
    fn scoped_and_unscoped_accumulate_independently() {
        let mut stats = collection();
        stats.record_scoped("Datastore/statement/MySQL/users/SELECT", Duration::from_millis(5), Duration::from_millis(5));
        stats.record_scoped("Datastore/statement/MySQL/users/SELECT", Duration::from_millis(7), Duration::from_millis(7));
        stats.record_unscoped("Datastore/all", Duration::from_millis(12), Duration::from_millis(12));

        assert_eq!(
            stats
                .scoped("Datastore/statement/MySQL/users/SELECT")
                .unwrap()
                .call_count,
            2
        );
        assert_eq!(stats.unscoped("Datastore/all").unwrap().call_count, 1);
        assert!(stats.scoped("Datastore/all").is_none());
        assert_eq!(stats.len(), 2);
    }
}
