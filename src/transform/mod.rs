// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! The transform pipeline.
//!
//! [`Transformer::transform`] turns one finished transaction into its
//! derived telemetry artifacts (metric statistics, a transaction event, a
//! transaction trace, error artifacts, SQL traces) and hands each to an
//! aggregator collaborator. Aggregators own batching and sending; this
//! core's responsibility ends at producing a correctly shaped artifact.
//!
//! Failure policy: a failing pipeline step degrades to a missing artifact,
//! never to losing the whole transaction's telemetry. The one exception is a
//! transform with zero segments, which is a programming error and panics.

pub(crate) mod attribute;
pub mod error;
pub mod event;
pub mod sql;
pub mod trace;

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use once_cell::unsync::OnceCell;

use crate::attributes::AttributeCollection;
use crate::config::Config;
use crate::context;
use crate::metrics::MetricStatsCollection;
use crate::name::TransactionMetricName;
use crate::name::TransactionName;
use crate::segment::SegmentKind;
use crate::transaction::ImmutableTransaction;
use crate::transaction::Transaction;
use crate::transform::attribute::make_attributes;
use crate::transform::error::make_error_event;
use crate::transform::error::make_error_trace;
use crate::transform::event::make_transaction_event;
use crate::transform::sql::try_make_sql_trace;
use crate::transform::trace::make_transaction_trace;
use crate::tree::build_segment_trees;

pub use crate::transform::error::ErrorEvent;
pub use crate::transform::error::ErrorTrace;
pub use crate::transform::event::TransactionEvent;
pub use crate::transform::sql::SqlTrace;
pub use crate::transform::sql::SqlTraceStatsCollection;
pub use crate::transform::trace::TraceNode;
pub use crate::transform::trace::TransactionTrace;
pub use crate::transform::trace::TransactionTraceComponents;

/// Accepts one named statistics batch per transaction.
#[cfg_attr(test, mockall::automock)]
pub trait MetricAggregator: Send + Sync + 'static {
    fn collect(&self, stats: MetricStatsCollection);
}

/// Accepts a lazily built trace plus its sampling priority metadata.
#[cfg_attr(test, mockall::automock)]
pub trait TransactionTraceAggregator: Send + Sync + 'static {
    fn collect(&self, trace: TransactionTraceComponents);
}

/// Accepts one attribute-tagged event per transaction.
#[cfg_attr(test, mockall::automock)]
pub trait TransactionEventAggregator: Send + Sync + 'static {
    fn collect(&self, event: TransactionEvent);
}

#[cfg_attr(test, mockall::automock)]
pub trait ErrorTraceAggregator: Send + Sync + 'static {
    fn collect(&self, error_trace: ErrorTrace);
}

#[cfg_attr(test, mockall::automock)]
pub trait ErrorEventAggregator: Send + Sync + 'static {
    fn collect(&self, error_event: ErrorEvent);
}

#[cfg_attr(test, mockall::automock)]
pub trait SqlTraceAggregator: Send + Sync + 'static {
    fn collect(&self, sql_traces: SqlTraceStatsCollection);
}

/// Health and diagnostics telemetry, notably leaked-transaction reports.
#[cfg_attr(test, mockall::automock)]
pub trait HealthReporter: Send + Sync + 'static {
    fn report_transaction_leaked(&self, guid: &str, estimated_duration: Duration);
}

/// Resolves a transaction's final metric name and per-name apdex
/// thresholds. Naming rules may declare a transaction ignored, which aborts
/// its whole pipeline.
#[cfg_attr(test, mockall::automock)]
pub trait MetricNameService: Send + Sync + 'static {
    fn transaction_metric_name(&self, name: &TransactionName) -> TransactionMetricName;
    fn apdex_t(&self, prefixed_name: &str) -> Option<Duration>;
}

/// Pass-through naming: no renames, no ignores, no per-name thresholds.
#[derive(Debug, Default)]
pub struct DefaultNameService;

impl MetricNameService for DefaultNameService {
    fn transaction_metric_name(&self, name: &TransactionName) -> TransactionMetricName {
        TransactionMetricName::new(name)
    }

    fn apdex_t(&self, _prefixed_name: &str) -> Option<Duration> {
        None
    }
}

/// Obfuscates SQL before it is recorded. Real obfuscation lives outside this
/// core; embedders plug their implementation in here.
pub trait SqlObfuscator: Send + Sync + 'static {
    fn obfuscate(&self, sql: &str) -> String;
}

/// Records SQL verbatim. The default until an embedder supplies a real
/// obfuscator.
#[derive(Debug, Default)]
pub struct IdentityObfuscator;

impl SqlObfuscator for IdentityObfuscator {
    fn obfuscate(&self, sql: &str) -> String {
        sql.to_string()
    }
}

/// A sink that logs every artifact at debug level. Useful for getting
/// started and for environments without a backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricAggregator for LogSink {
    fn collect(&self, stats: MetricStatsCollection) {
        debug!("metrics for {}: {} entries", stats.transaction_name(), stats.len());
    }
}

impl TransactionTraceAggregator for LogSink {
    fn collect(&self, trace: TransactionTraceComponents) {
        debug!("transaction trace: {:?}", trace);
    }
}

impl TransactionEventAggregator for LogSink {
    fn collect(&self, event: TransactionEvent) {
        debug!("transaction event: {:?}", event);
    }
}

impl ErrorTraceAggregator for LogSink {
    fn collect(&self, error_trace: ErrorTrace) {
        debug!("error trace: {:?}", error_trace);
    }
}

impl ErrorEventAggregator for LogSink {
    fn collect(&self, error_event: ErrorEvent) {
        debug!("error event: {:?}", error_event);
    }
}

impl SqlTraceAggregator for LogSink {
    fn collect(&self, sql_traces: SqlTraceStatsCollection) {
        debug!("sql traces: {} statements", sql_traces.len());
    }
}

impl HealthReporter for LogSink {
    fn report_transaction_leaked(&self, guid: &str, estimated_duration: Duration) {
        debug!(
            "transaction {} was garbage collected without being ended; estimated duration {:?}",
            guid, estimated_duration
        );
    }
}

/// The downstream collaborators one transformer feeds.
#[derive(Clone)]
pub struct Aggregators {
    pub metrics: Arc<dyn MetricAggregator>,
    pub transaction_traces: Arc<dyn TransactionTraceAggregator>,
    pub transaction_events: Arc<dyn TransactionEventAggregator>,
    pub error_traces: Arc<dyn ErrorTraceAggregator>,
    pub error_events: Arc<dyn ErrorEventAggregator>,
    pub sql_traces: Arc<dyn SqlTraceAggregator>,
}

impl Aggregators {
    /// Every artifact goes to the debug log.
    pub fn log() -> Self {
        Aggregators {
            metrics: Arc::new(LogSink),
            transaction_traces: Arc::new(LogSink),
            transaction_events: Arc::new(LogSink),
            error_traces: Arc::new(LogSink),
            error_events: Arc::new(LogSink),
            sql_traces: Arc::new(LogSink),
        }
    }
}

/// The pipeline seam the finalizer dispatches through.
#[cfg_attr(test, mockall::automock)]
pub trait Transform: Send + Sync + 'static {
    fn transform(&self, transaction: &Transaction);
}

/// Orchestrates the projection of one finished transaction into all of its
/// telemetry artifacts.
pub struct Transformer {
    config: Config,
    name_service: Arc<dyn MetricNameService>,
    obfuscator: Arc<dyn SqlObfuscator>,
    aggregators: Aggregators,
}

impl Transformer {
    pub fn new(config: Config, aggregators: Aggregators) -> Self {
        Transformer {
            config,
            name_service: Arc::new(DefaultNameService),
            obfuscator: Arc::new(IdentityObfuscator),
            aggregators,
        }
    }

    pub fn with_name_service(mut self, name_service: Arc<dyn MetricNameService>) -> Self {
        self.name_service = name_service;
        self
    }

    pub fn with_obfuscator(mut self, obfuscator: Arc<dyn SqlObfuscator>) -> Self {
        self.obfuscator = obfuscator;
        self
    }

    fn apdex_t(
        &self,
        transaction: &ImmutableTransaction,
        metric_name: &TransactionMetricName,
    ) -> Option<Duration> {
        let apdex_t = self.name_service.apdex_t(metric_name.prefixed_name());
        if transaction.is_web() {
            apdex_t.or(Some(self.config.apdex_t))
        } else {
            apdex_t
        }
    }

    fn transform_snapshot(
        &self,
        snapshot: Arc<ImmutableTransaction>,
        metric_name: TransactionMetricName,
    ) {
        assert!(
            snapshot.segment_count() > 0,
            "transaction does not have any segments"
        );

        finish_dangling_segments(&snapshot);
        self.try_generate_explain_plans(&snapshot);

        let total_time: Duration = snapshot
            .live_segments()
            .map(|segment| segment.exclusive_duration_or_zero())
            .sum();
        let apdex_t = self.apdex_t(&snapshot, &metric_name);

        let mut stats = MetricStatsCollection::new(metric_name.clone());
        self.generate_metrics(&snapshot, &metric_name, apdex_t, total_time, &mut stats);
        self.aggregators.metrics.collect(stats);

        // Attribute building is deferred until the first artifact asks, then
        // shared by all of them.
        let attributes_cell: OnceCell<AttributeCollection> = OnceCell::new();
        let attributes = || {
            attributes_cell
                .get_or_init(|| make_attributes(&snapshot, &metric_name, apdex_t, total_time))
        };

        // Error artifacts come first; the later artifacts reuse the same
        // attribute collection with the error state already folded in.
        if self.config.error_collector_enabled && snapshot.metadata().has_error() {
            if let Some(error_trace) = make_error_trace(&snapshot, &metric_name, attributes()) {
                self.aggregators.error_traces.collect(error_trace);

                if self.config.error_events_enabled {
                    if let Some(error_event) =
                        make_error_event(&snapshot, &metric_name, attributes())
                    {
                        self.aggregators.error_events.collect(error_event);
                    }
                }
            }
        }

        if self.config.transaction_events_enabled {
            self.aggregators
                .transaction_events
                .collect(make_transaction_event(&snapshot, attributes()));
        }

        if self.config.transaction_tracer_enabled {
            let components = TransactionTraceComponents::new(
                metric_name.clone(),
                snapshot.duration(),
                snapshot.metadata().is_synthetics(),
                Box::new({
                    let snapshot = snapshot.clone();
                    let attributes = attributes().clone();
                    move || {
                        make_transaction_trace(
                            &snapshot,
                            build_segment_trees(snapshot.segments()),
                            &attributes,
                        )
                    }
                }),
            );
            self.aggregators.transaction_traces.collect(components);
        }

        if self.config.slow_sql_enabled {
            self.generate_sql_traces(&snapshot, &metric_name);
        }
    }

    fn try_generate_explain_plans(&self, snapshot: &ImmutableTransaction) {
        if !self.config.sql_explain_plans_enabled
            || (!self.config.transaction_tracer_enabled && !self.config.slow_sql_enabled)
        {
            return;
        }

        let mut generated = 0;
        for segment in snapshot.live_segments() {
            let data = match segment.kind() {
                SegmentKind::Datastore(data) => data,
                _ => continue,
            };
            if segment.duration_or_zero() <= self.config.sql_explain_plan_threshold {
                continue;
            }
            let source = match &data.explain_source {
                Some(source) => source,
                None => continue,
            };
            match source.explain() {
                Ok(plan) => {
                    let _ = data.explain_plan.set(plan);
                    generated += 1;
                    if generated >= self.config.sql_explain_plans_max {
                        return;
                    }
                }
                Err(error) => {
                    debug!(
                        "explain plan generation failed for segment {:?}: {}",
                        segment.id(),
                        error
                    );
                }
            }
        }
    }

    fn generate_metrics(
        &self,
        snapshot: &ImmutableTransaction,
        metric_name: &TransactionMetricName,
        apdex_t: Option<Duration>,
        total_time: Duration,
        stats: &mut MetricStatsCollection,
    ) {
        for segment in snapshot.live_segments() {
            segment.add_metric_stats(stats);
        }

        let metadata = snapshot.metadata();
        let is_web = snapshot.is_web();
        let response_time = snapshot.response_time_or_duration();
        let suffix = snapshot.name().suffix();

        stats.record_unscoped(metric_name.prefixed_name(), response_time, response_time);
        if is_web {
            stats.record_unscoped("WebTransaction", response_time, response_time);
            stats.record_unscoped("HttpDispatcher", response_time, response_time);
        } else {
            stats.record_unscoped("OtherTransaction/all", response_time, response_time);
        }

        // Total time sums exclusive durations, so parallel work counts even
        // when it exceeds wall-clock duration.
        if is_web {
            stats.record_unscoped("WebTransactionTotalTime", total_time, total_time);
            stats.record_unscoped(
                format!("WebTransactionTotalTime/{}", suffix),
                total_time,
                total_time,
            );
        } else {
            stats.record_unscoped("OtherTransactionTotalTime", total_time, total_time);
            stats.record_unscoped(
                format!("OtherTransactionTotalTime/{}", suffix),
                total_time,
                total_time,
            );
        }

        if let Some(queue_time) = metadata.queue_time {
            stats.record_unscoped("WebFrontend/QueueTime", queue_time, queue_time);
        }

        if let Some(tracing_state) = &metadata.tracing_state {
            let caller = format!(
                "{}/{}/{}/{}",
                tracing_state
                    .parent_type
                    .map(|parent_type| parent_type.as_str())
                    .unwrap_or("Unknown"),
                tracing_state.parent_account_id.as_deref().unwrap_or("Unknown"),
                tracing_state.parent_app_id.as_deref().unwrap_or("Unknown"),
                tracing_state.transport_type.as_str(),
            );
            let rollup_suffix = if is_web { "allWeb" } else { "allOther" };

            let duration = snapshot.duration();
            stats.record_unscoped(format!("DurationByCaller/{}/all", caller), duration, duration);
            stats.record_unscoped(
                format!("DurationByCaller/{}/{}", caller, rollup_suffix),
                duration,
                duration,
            );

            if tracing_state.parent_type.is_some() {
                let transport = tracing_state.transport_duration;
                stats.record_unscoped(
                    format!("TransportDuration/{}/all", caller),
                    transport,
                    transport,
                );
                stats.record_unscoped(
                    format!("TransportDuration/{}/{}", caller, rollup_suffix),
                    transport,
                    transport,
                );
            }

            if self.config.error_collector_enabled && metadata.has_error() {
                stats.record_unscoped_count(format!("ErrorsByCaller/{}/all", caller));
                stats.record_unscoped_count(format!("ErrorsByCaller/{}/{}", caller, rollup_suffix));
            }
        }

        if let Some(apdex_t) = apdex_t {
            if !snapshot.ignore_apdex() {
                let unexpected_error = metadata
                    .error
                    .as_ref()
                    .is_some_and(|error| !error.expected);
                if unexpected_error {
                    stats.record_frustrated_apdex("Apdex");
                    stats.record_frustrated_apdex(metric_name.apdex_name());
                } else {
                    stats.record_apdex("Apdex", response_time, apdex_t);
                    stats.record_apdex(metric_name.apdex_name(), response_time, apdex_t);
                }
            }
        }

        if self.config.error_collector_enabled {
            if let Some(error) = &metadata.error {
                if error.expected {
                    stats.record_unscoped_count("ErrorsExpected/all");
                } else {
                    stats.record_unscoped_count("Errors/all");
                    stats.record_unscoped_count(if is_web {
                        "Errors/allWeb"
                    } else {
                        "Errors/allOther"
                    });
                    stats.record_unscoped_count(format!("Errors/{}", metric_name.prefixed_name()));
                }
            }
        }

        if let Some(process_id) = &metadata.cross_application_referrer_process_id {
            let response = metadata.cross_application_response_time.unwrap_or_default();
            stats.record_unscoped(
                format!("ClientApplication/{}/all", process_id),
                response,
                response,
            );
        }
    }

    fn generate_sql_traces(
        &self,
        snapshot: &Arc<ImmutableTransaction>,
        metric_name: &TransactionMetricName,
    ) {
        let mut sql_traces = SqlTraceStatsCollection::default();
        for segment in snapshot.live_segments() {
            if !matches!(segment.kind(), SegmentKind::Datastore(_)) {
                continue;
            }
            if segment.duration_or_zero() < self.config.sql_explain_plan_threshold {
                continue;
            }
            if let Some(trace) =
                try_make_sql_trace(snapshot, metric_name, segment, &*self.obfuscator)
            {
                sql_traces.insert(trace);
            }
        }
        if !sql_traces.is_empty() {
            self.aggregators.sql_traces.collect(sql_traces);
        }
    }
}

impl Transform for Transformer {
    /// Entry point of the pipeline. Skipped entirely for ignored
    /// transactions; aborted before any artifact when naming rules say
    /// ignore, so no partial artifacts escape.
    fn transform(&self, transaction: &Transaction) {
        if transaction.is_ignored() {
            return;
        }

        let snapshot = Arc::new(transaction.to_immutable());
        let metric_name = self.name_service.transaction_metric_name(snapshot.name());
        if metric_name.should_ignore() {
            debug!(
                "transaction \"{}\" is being ignored due to metric naming rules",
                metric_name
            );
            return;
        }

        self.transform_snapshot(snapshot, metric_name.clone());
        debug!(
            "transaction {} ({}) transform completed",
            transaction.guid(),
            metric_name
        );
    }
}

/// Force-finishes segments instrumentation never ended, in reverse creation
/// order so children close before parents. This bounds a hung operation's
/// reported duration to "now" rather than leaving it open forever.
fn finish_dangling_segments(snapshot: &ImmutableTransaction) {
    let now = snapshot.relative_now();
    let dangling: Vec<_> = snapshot
        .live_segments()
        .filter(|segment| segment.relative_end().is_none())
        .cloned()
        .collect();

    for segment in dangling.iter().rev() {
        // If the segment ended between snapshotting and now, force_end has
        // no effect.
        if segment.force_end(now) {
            debug!("forced segment {:?} to finish", segment.id());
            if let Some(parent) = segment
                .parent_id()
                .and_then(|parent_id| snapshot.segment(parent_id))
            {
                parent.child_finished(segment, context::current_context_id());
            }
        }
    }
}
