// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::RecordSql;
use crate::name::TransactionMetricName;
use crate::segment::strip_query_string;
use crate::segment::ExplainPlan;
use crate::segment::Segment;
use crate::segment::SegmentKind;
use crate::transaction::ImmutableTransaction;
use crate::transform::SqlObfuscator;

const MAX_SQL_LEN: usize = 16384;

/// A slow-SQL sample: one statement aggregated across its occurrences within
/// a transaction.
#[derive(Debug, Clone)]
pub struct SqlTrace {
    pub transaction_name: String,
    pub uri: String,
    /// Stable id of the recorded statement text, used as the aggregation
    /// key across transactions too.
    pub sql_id: u32,
    pub sql: String,
    /// The datastore metric name of the originating segment.
    pub metric_name: String,
    pub call_count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub explain_plan: Option<ExplainPlan>,
    pub parameters: Vec<(Cow<'static, str>, String)>,
}

/// Slow-SQL samples for one transaction, keyed by statement id.
#[derive(Debug, Clone, Default)]
pub struct SqlTraceStatsCollection {
    traces: HashMap<u32, SqlTrace>,
}

impl SqlTraceStatsCollection {
    pub fn insert(&mut self, trace: SqlTrace) {
        match self.traces.get_mut(&trace.sql_id) {
            Some(existing) => {
                existing.call_count += trace.call_count;
                existing.total_duration += trace.total_duration;
                if trace.min_duration < existing.min_duration {
                    existing.min_duration = trace.min_duration;
                }
                if trace.max_duration > existing.max_duration {
                    // Keep the slowest occurrence's details.
                    existing.max_duration = trace.max_duration;
                    existing.explain_plan = trace.explain_plan;
                    existing.parameters = trace.parameters;
                }
            }
            None => {
                self.traces.insert(trace.sql_id, trace);
            }
        }
    }

    pub fn get(&self, sql_id: u32) -> Option<&SqlTrace> {
        self.traces.get(&sql_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SqlTrace> {
        self.traces.values()
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Projects one slow datastore segment into a SQL trace, applying the
/// transaction's SQL recording policy. Returns `None` when recording is off
/// or the segment carries no statement.
pub(crate) fn try_make_sql_trace(
    transaction: &ImmutableTransaction,
    metric_name: &TransactionMetricName,
    segment: &Segment,
    obfuscator: &dyn SqlObfuscator,
) -> Option<SqlTrace> {
    let data = match segment.kind() {
        SegmentKind::Datastore(data) => data,
        _ => return None,
    };
    let command_text = data.command_text.as_deref()?;

    let sql = match transaction.record_sql() {
        RecordSql::Off => return None,
        RecordSql::Raw => command_text.to_string(),
        RecordSql::Obfuscated => obfuscator.obfuscate(command_text),
    };
    let sql = truncate(&sql, MAX_SQL_LEN);
    let duration = segment.duration_or_zero();

    Some(SqlTrace {
        transaction_name: metric_name.prefixed_name().to_string(),
        uri: transaction
            .metadata()
            .uri
            .as_deref()
            .map(strip_query_string)
            .unwrap_or("<unknown>")
            .to_string(),
        sql_id: sql_id(&sql),
        sql,
        metric_name: segment.kind().trace_name(),
        call_count: 1,
        total_duration: duration,
        min_duration: duration,
        max_duration: duration,
        explain_plan: data.explain_plan().cloned(),
        parameters: segment.parameters(),
    })
}

/// A stable 31-bit id for a statement text. Deterministic across processes
/// so the backend can aggregate the same statement from many agents.
pub(crate) fn sql_id(sql: &str) -> u32 {
    let hash = sql
        .bytes()
        .fold(5381u32, |hash, b| hash.wrapping_mul(33).wrapping_add(b as u32));
    hash & 0x7fff_ffff
}

fn truncate(sql: &str, max: usize) -> String {
    match sql.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::finalizer::MockFinalize;
    use crate::name::TransactionName;
    use crate::segment::DatastoreData;
    use crate::segment::SegmentId;
    use crate::transaction::Transaction;
    use crate::transform::IdentityObfuscator;
    use std::sync::Arc;

    fn snapshot(record_sql: RecordSql, command_text: Option<&str>) -> ImmutableTransaction {
        let mut mock = MockFinalize::new();
        mock.expect_on_transaction_dropped().return_const(());
        let transaction = Transaction::start(
            Config::default().record_sql(record_sql),
            TransactionName::web("MVC", "Sql"),
            Arc::new(mock),
        );
        transaction.set_uri("https://example.com/orders?page=2");
        transaction.push_segment_for_test(|id| {
            let mut data = DatastoreData::new("MySQL", "SELECT").model("orders");
            if let Some(command_text) = command_text {
                data = data.command_text(command_text);
            }
            let segment = Segment::new(
                id,
                None,
                SegmentKind::Datastore(data),
                Duration::ZERO,
                1,
            );
            segment.end_with(Duration::from_millis(800));
            segment
        });
        transaction.to_immutable()
    }

    fn metric_name() -> TransactionMetricName {
        TransactionMetricName::new(&TransactionName::web("MVC", "Sql"))
    }

    fn segment_of(snapshot: &ImmutableTransaction) -> Arc<Segment> {
        snapshot.segment(SegmentId(0)).unwrap().clone()
    }

    #[test]
    fn raw_policy_records_the_statement_verbatim() {
        let snapshot = snapshot(RecordSql::Raw, Some("SELECT * FROM orders WHERE id = 7"));
        let trace = try_make_sql_trace(
            &snapshot,
            &metric_name(),
            &segment_of(&snapshot),
            &IdentityObfuscator,
        )
        .unwrap();

        assert_eq!(trace.sql, "SELECT * FROM orders WHERE id = 7");
        assert_eq!(trace.metric_name, "Datastore/statement/MySQL/orders/SELECT");
        assert_eq!(trace.uri, "https://example.com/orders");
        assert_eq!(trace.call_count, 1);
        assert_eq!(trace.total_duration, Duration::from_millis(800));
    }

    #[test]
    fn off_policy_records_nothing() {
        let snapshot = snapshot(RecordSql::Off, Some("SELECT 1"));
        assert!(try_make_sql_trace(
            &snapshot,
            &metric_name(),
            &segment_of(&snapshot),
            &IdentityObfuscator
        )
        .is_none());
    }

    #[test]
    fn segment_without_statement_records_nothing() {
        let snapshot = snapshot(RecordSql::Raw, None);
        assert!(try_make_sql_trace(
            &snapshot,
            &metric_name(),
            &segment_of(&snapshot),
            &IdentityObfuscator
        )
        .is_none());
    }

    #[test]
    fn obfuscated_policy_consults_the_obfuscator() {
        struct Redacting;
        impl SqlObfuscator for Redacting {
            fn obfuscate(&self, _sql: &str) -> String {
                "SELECT * FROM orders WHERE id = ?".to_string()
            }
        }

        let snapshot = snapshot(RecordSql::Obfuscated, Some("SELECT * FROM orders WHERE id = 7"));
        let trace =
            try_make_sql_trace(&snapshot, &metric_name(), &segment_of(&snapshot), &Redacting)
                .unwrap();
        assert_eq!(trace.sql, "SELECT * FROM orders WHERE id = ?");
    }

    #[test]
    fn sql_id_is_stable_and_31_bit() {
        let a = sql_id("SELECT * FROM orders WHERE id = ?");
        let b = sql_id("SELECT * FROM orders WHERE id = ?");
        let c = sql_id("SELECT * FROM users WHERE id = ?");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a & 0x8000_0000, 0);
    }

    #[test]
    fn long_statements_are_truncated() {
        let long = "S".repeat(MAX_SQL_LEN + 100);
        let snapshot = snapshot(RecordSql::Raw, Some(&long));
        let trace = try_make_sql_trace(
            &snapshot,
            &metric_name(),
            &segment_of(&snapshot),
            &IdentityObfuscator,
        )
        .unwrap();
        assert_eq!(trace.sql.len(), MAX_SQL_LEN + 3);
        assert!(trace.sql.ends_with("..."));
    }

    #[test]
    fn collection_aggregates_by_sql_id_keeping_the_slowest_sample() {
        let mut collection = SqlTraceStatsCollection::default();
        let base = SqlTrace {
            transaction_name: "WebTransaction/MVC/Sql".to_string(),
            uri: "<unknown>".to_string(),
            sql_id: 42,
            sql: "SELECT 1".to_string(),
            metric_name: "Datastore/operation/MySQL/SELECT".to_string(),
            call_count: 1,
            total_duration: Duration::from_millis(100),
            min_duration: Duration::from_millis(100),
            max_duration: Duration::from_millis(100),
            explain_plan: None,
            parameters: Vec::new(),
        };
        collection.insert(base.clone());
        collection.insert(SqlTrace {
            total_duration: Duration::from_millis(300),
            min_duration: Duration::from_millis(300),
            max_duration: Duration::from_millis(300),
            explain_plan: Some(ExplainPlan::default()),
            ..base.clone()
        });
        collection.insert(SqlTrace {
            total_duration: Duration::from_millis(50),
            min_duration: Duration::from_millis(50),
            max_duration: Duration::from_millis(50),
            ..base
        });

        assert_eq!(collection.len(), 1);
        let merged = collection.get(42).unwrap();
        assert_eq!(merged.call_count, 3);
        assert_eq!(merged.total_duration, Duration::from_millis(450));
        assert_eq!(merged.min_duration, Duration::from_millis(50));
        assert_eq!(merged.max_duration, Duration::from_millis(300));
        assert!(merged.explain_plan.is_some());
    }
}
