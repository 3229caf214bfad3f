// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::time::Duration;

/// The SQL recording policy applied when projecting datastore segments into
/// traces.
///
/// Obfuscation itself is performed by a [`SqlObfuscator`] collaborator; this
/// policy only decides whether the obfuscator is consulted at all.
///
/// [`SqlObfuscator`]: crate::transform::SqlObfuscator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordSql {
    /// Do not record SQL statements.
    Off,
    /// Record SQL statements verbatim.
    Raw,
    /// Record SQL statements after passing them through the obfuscator.
    #[default]
    Obfuscated,
}

/// Runtime thresholds and feature flags consumed by the tracing core.
///
/// All values are plain booleans and numbers handed in by the embedding
/// agent's configuration layer. Loading them from files or the wire is out of
/// scope here.
///
/// # Examples
///
/// ```
/// use apmtrace::Config;
/// use std::time::Duration;
///
/// let config = Config::default()
///     .apdex_t(Duration::from_millis(250))
///     .transaction_tracer_max_segments(1000);
/// ```
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub(crate) transaction_tracer_enabled: bool,
    pub(crate) transaction_events_enabled: bool,
    pub(crate) error_collector_enabled: bool,
    pub(crate) error_events_enabled: bool,
    pub(crate) slow_sql_enabled: bool,
    pub(crate) sql_explain_plans_enabled: bool,
    pub(crate) sql_explain_plan_threshold: Duration,
    pub(crate) sql_explain_plans_max: usize,
    pub(crate) transaction_tracer_max_segments: usize,
    pub(crate) record_sql: RecordSql,
    pub(crate) apdex_t: Duration,
    pub(crate) complete_transactions_on_thread: bool,
    pub(crate) leaked_duration_floor: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transaction_tracer_enabled: true,
            transaction_events_enabled: true,
            error_collector_enabled: true,
            error_events_enabled: true,
            slow_sql_enabled: true,
            sql_explain_plans_enabled: true,
            sql_explain_plan_threshold: Duration::from_millis(500),
            sql_explain_plans_max: 20,
            transaction_tracer_max_segments: 3000,
            record_sql: RecordSql::default(),
            apdex_t: Duration::from_millis(500),
            complete_transactions_on_thread: true,
            leaked_duration_floor: Duration::from_millis(1),
        }
    }
}

impl Config {
    /// Whether transaction traces are generated at all.
    pub fn transaction_tracer_enabled(self, enabled: bool) -> Self {
        Self {
            transaction_tracer_enabled: enabled,
            ..self
        }
    }

    /// Whether one event per finished transaction is emitted.
    pub fn transaction_events_enabled(self, enabled: bool) -> Self {
        Self {
            transaction_events_enabled: enabled,
            ..self
        }
    }

    /// Whether error traces are collected for transactions that recorded an
    /// error.
    pub fn error_collector_enabled(self, enabled: bool) -> Self {
        Self {
            error_collector_enabled: enabled,
            ..self
        }
    }

    /// Whether an error event accompanies each collected error trace.
    pub fn error_events_enabled(self, enabled: bool) -> Self {
        Self {
            error_events_enabled: enabled,
            ..self
        }
    }

    /// Whether slow datastore segments produce SQL traces.
    pub fn slow_sql_enabled(self, enabled: bool) -> Self {
        Self {
            slow_sql_enabled: enabled,
            ..self
        }
    }

    /// Whether explain plans are generated for slow datastore segments.
    pub fn sql_explain_plans_enabled(self, enabled: bool) -> Self {
        Self {
            sql_explain_plans_enabled: enabled,
            ..self
        }
    }

    /// A datastore segment must run at least this long before an explain plan
    /// is attempted or a SQL trace is recorded for it.
    pub fn sql_explain_plan_threshold(self, threshold: Duration) -> Self {
        Self {
            sql_explain_plan_threshold: threshold,
            ..self
        }
    }

    /// An upper bound on explain plans generated per transaction.
    pub fn sql_explain_plans_max(self, max: usize) -> Self {
        Self {
            sql_explain_plans_max: max,
            ..self
        }
    }

    /// A soft limit on retained segments, usually used to avoid
    /// out-of-memory.
    ///
    /// # Notice
    ///
    /// Segments beyond the limit still receive ids and still contribute to
    /// their parents' timing, but their contents are released as soon as they
    /// finish.
    pub fn transaction_tracer_max_segments(self, max: usize) -> Self {
        Self {
            transaction_tracer_max_segments: max,
            ..self
        }
    }

    /// The SQL recording policy.
    pub fn record_sql(self, record_sql: RecordSql) -> Self {
        Self { record_sql, ..self }
    }

    /// The default apdex threshold, applied to web transactions whose name
    /// has no specific threshold configured.
    pub fn apdex_t(self, apdex_t: Duration) -> Self {
        Self { apdex_t, ..self }
    }

    /// When true, a transaction is transformed on the thread that ended it.
    /// When false, transform work is queued to the background worker and
    /// `end()` returns without waiting for it.
    pub fn complete_transactions_on_thread(self, on_thread: bool) -> Self {
        Self {
            complete_transactions_on_thread: on_thread,
            ..self
        }
    }

    /// The duration assigned to a leaked transaction whose segments carry no
    /// usable timing at all.
    pub fn leaked_duration_floor(self, floor: Duration) -> Self {
        Self {
            leaked_duration_floor: floor,
            ..self
        }
    }
}
