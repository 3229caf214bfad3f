// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use apmtrace::metadata::ErrorData;
use apmtrace::metrics::MetricStatsCollection;
use apmtrace::prelude::*;
use apmtrace::transform::ErrorEvent;
use apmtrace::transform::ErrorEventAggregator;
use apmtrace::transform::ErrorTrace;
use apmtrace::transform::ErrorTraceAggregator;
use apmtrace::transform::MetricAggregator;
use apmtrace::transform::SqlTraceAggregator;
use apmtrace::transform::SqlTraceStatsCollection;
use apmtrace::transform::TransactionEvent;
use apmtrace::transform::TransactionEventAggregator;
use apmtrace::transform::TransactionTrace;
use apmtrace::transform::TransactionTraceAggregator;
use apmtrace::transform::TransactionTraceComponents;

/// Records every artifact the pipeline emits so tests can assert on them.
#[derive(Default)]
struct Recorder {
    metrics: Mutex<Vec<MetricStatsCollection>>,
    traces: Mutex<Vec<TransactionTrace>>,
    events: Mutex<Vec<TransactionEvent>>,
    error_traces: Mutex<Vec<ErrorTrace>>,
    error_events: Mutex<Vec<ErrorEvent>>,
    sql_traces: Mutex<Vec<SqlTraceStatsCollection>>,
}

impl MetricAggregator for Recorder {
    fn collect(&self, stats: MetricStatsCollection) {
        self.metrics.lock().push(stats);
    }
}

impl TransactionTraceAggregator for Recorder {
    fn collect(&self, trace: TransactionTraceComponents) {
        self.traces.lock().push(trace.build());
    }
}

impl TransactionEventAggregator for Recorder {
    fn collect(&self, event: TransactionEvent) {
        self.events.lock().push(event);
    }
}

impl ErrorTraceAggregator for Recorder {
    fn collect(&self, error_trace: ErrorTrace) {
        self.error_traces.lock().push(error_trace);
    }
}

impl ErrorEventAggregator for Recorder {
    fn collect(&self, error_event: ErrorEvent) {
        self.error_events.lock().push(error_event);
    }
}

impl SqlTraceAggregator for Recorder {
    fn collect(&self, sql_traces: SqlTraceStatsCollection) {
        self.sql_traces.lock().push(sql_traces);
    }
}

fn recording_runtime(config: Config) -> (Arc<Recorder>, Arc<TransactionFinalizer>) {
    let recorder = Arc::new(Recorder::default());
    let aggregators = Aggregators {
        metrics: recorder.clone(),
        transaction_traces: recorder.clone(),
        transaction_events: recorder.clone(),
        error_traces: recorder.clone(),
        error_events: recorder.clone(),
        sql_traces: recorder.clone(),
    };
    let transformer = Arc::new(Transformer::new(config.clone(), aggregators));
    let finalizer = Arc::new(TransactionFinalizer::new(config, transformer));
    (recorder, finalizer)
}

#[test]
fn web_request_produces_every_artifact() {
    let config = Config::default()
        .record_sql(RecordSql::Raw)
        .sql_explain_plan_threshold(Duration::ZERO);
    let (recorder, finalizer) = recording_runtime(config.clone());

    let txn = Transaction::start(
        config,
        TransactionName::web("Uri", "/orders"),
        finalizer,
    );
    txn.set_uri("https://shop.example.com/orders?page=2");
    txn.set_http_response_status_code(500);
    txn.set_name(TransactionName::web("MVC", "Orders/List"), NamePriority::Route);

    let controller = txn.start_method_segment("OrdersController", "List").unwrap();
    let query = txn
        .start_datastore_segment(
            DatastoreData::new("MySQL", "SELECT")
                .model("orders")
                .command_text("SELECT * FROM orders WHERE user = 7"),
        )
        .unwrap();
    txn.end_segment(query);
    let call = txn
        .start_external_segment("https://billing.example.com/v1/invoices", "GET")
        .unwrap();
    txn.end_segment_with_error(call, ErrorData::new("GatewayTimeout", "upstream timed out"));
    txn.end_segment(controller);

    txn.end();

    // Metrics: one batch with transaction and segment rollups.
    let metrics = recorder.metrics.lock();
    assert_eq!(metrics.len(), 1);
    let stats = &metrics[0];
    assert_eq!(
        stats.transaction_name().prefixed_name(),
        "WebTransaction/MVC/Orders/List"
    );
    assert!(stats.unscoped("WebTransaction").is_some());
    assert!(stats.scoped("Method/OrdersController/List").is_some());
    assert!(stats
        .scoped("Datastore/statement/MySQL/orders/SELECT")
        .is_some());
    assert!(stats.unscoped("External/billing.example.com/all").is_some());
    assert_eq!(stats.unscoped("Errors/allWeb").unwrap().call_count, 1);

    // Transaction event.
    let events = recorder.events.lock();
    assert_eq!(events.len(), 1);
    assert!(events[0]
        .agent_attributes
        .iter()
        .any(|(name, value)| name == "request.uri"
            && value.to_string() == "https://shop.example.com/orders"));

    // Error artifacts, since a segment reported an error.
    assert_eq!(recorder.error_traces.lock().len(), 1);
    assert_eq!(
        recorder.error_traces.lock()[0].error_type,
        "GatewayTimeout"
    );
    assert_eq!(recorder.error_events.lock().len(), 1);

    // Transaction trace with a single faux root over the real tree.
    let traces = recorder.traces.lock();
    assert_eq!(traces.len(), 1);
    let trace = &traces[0];
    assert_eq!(trace.root.name, "ROOT");
    assert_eq!(trace.root.children.len(), 1);
    let controller_node = &trace.root.children[0];
    assert_eq!(controller_node.name, "Method/OrdersController/List");
    assert_eq!(controller_node.children.len(), 2);

    // SQL trace for the recorded statement.
    let sql = recorder.sql_traces.lock();
    assert_eq!(sql.len(), 1);
    let statement = sql[0].iter().next().unwrap();
    assert_eq!(statement.sql, "SELECT * FROM orders WHERE user = 7");
    assert_eq!(statement.uri, "https://shop.example.com/orders");
}

#[test]
fn ignored_transaction_never_reaches_the_pipeline() {
    let (recorder, finalizer) = recording_runtime(Config::default());

    let txn = Transaction::start(
        Config::default(),
        TransactionName::web("Uri", "/health"),
        finalizer,
    );
    txn.ignore();
    let segment = txn.start_custom_segment("never recorded").unwrap();
    assert!(segment.is_noop());
    txn.end_segment(segment);
    txn.end();

    assert!(recorder.metrics.lock().is_empty());
    assert!(recorder.events.lock().is_empty());
    assert!(recorder.traces.lock().is_empty());
}

#[test]
fn leaked_transaction_still_reports_telemetry() {
    let (recorder, finalizer) = recording_runtime(Config::default());

    {
        let txn = Transaction::start(
            Config::default(),
            TransactionName::other("Job", "Abandoned"),
            finalizer,
        );
        let _forgotten = txn.start_custom_segment("never ended").unwrap();
        // Dropped without end(): leak recovery runs on drop.
    }

    let metrics = recorder.metrics.lock();
    assert_eq!(metrics.len(), 1);
    assert!(metrics[0]
        .unscoped("OtherTransaction/Job/Abandoned")
        .is_some());

    let traces = recorder.traces.lock();
    assert_eq!(traces.len(), 1);
    // The dangling segment was force-finished and marked.
    let node = &traces[0].root.children[0];
    assert!(node
        .parameters
        .iter()
        .any(|(key, value)| *key == "unfinished" && value == "true"));
}

#[test]
fn transform_off_thread_still_delivers_artifacts() {
    let config = Config::default().complete_transactions_on_thread(false);
    let (recorder, finalizer) = recording_runtime(config.clone());

    let txn = Transaction::start(
        config,
        TransactionName::web("MVC", "Deferred"),
        finalizer.clone(),
    );
    let segment = txn.start_custom_segment("work").unwrap();
    txn.end_segment(segment);
    txn.end();
    // end() returned without waiting for transform.
    assert!(txn.is_finished());

    // The worker delivers eventually; completion ordering with the ending
    // thread is intentionally decoupled.
    for _ in 0..200 {
        if !recorder.metrics.lock().is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(recorder.metrics.lock().len(), 1);
    assert_eq!(recorder.events.lock().len(), 1);
}

#[test]
fn async_branches_parent_under_the_attach_point() {
    let (recorder, finalizer) = recording_runtime(Config::default());

    let txn = Transaction::start(
        Config::default(),
        TransactionName::web("MVC", "Fanout"),
        finalizer,
    );
    let root = txn.start_custom_segment("scatter").unwrap();
    let _guard = txn.attach_to_async();

    let mut handles = Vec::new();
    for worker in 0..3 {
        let txn = txn.clone();
        handles.push(std::thread::spawn(move || {
            let segment = txn
                .start_custom_segment(&format!("shard {}", worker))
                .unwrap();
            txn.end_segment(segment);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    txn.end_segment(root);
    txn.end();

    let traces = recorder.traces.lock();
    let scatter = &traces[0].root.children[0];
    assert_eq!(scatter.name, "Custom/scatter");
    assert_eq!(scatter.children.len(), 3);
}

#[test]
fn holds_keep_the_transaction_open_until_released() {
    let (recorder, finalizer) = recording_runtime(Config::default());

    let txn = Transaction::start(
        Config::default(),
        TransactionName::other("Job", "Held"),
        finalizer,
    );
    let segment = txn.start_custom_segment("primary").unwrap();
    txn.end_segment(segment);

    txn.hold();
    txn.end();
    assert!(!txn.is_finished());
    assert!(recorder.metrics.lock().is_empty());

    txn.release();
    assert!(txn.is_finished());
    assert_eq!(recorder.metrics.lock().len(), 1);
}
