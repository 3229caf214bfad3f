// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::time::Duration;

use crate::attributes::AttributeCollection;
use crate::attributes::DEST_ALL;
use crate::attributes::DEST_ERRORS;
use crate::attributes::DEST_TRANSACTION_EVENT;
use crate::attributes::DEST_TRANSACTION_TRACE;
use crate::name::TransactionMetricName;
use crate::segment::strip_query_string;
use crate::transaction::ImmutableTransaction;

/// Builds the shared attribute collection for one finished transaction:
/// intrinsic facts, agent-observed request data and user attributes, each
/// tagged with the artifact destinations it applies to. Error state folds in
/// here so error artifacts and the transaction event agree on it.
pub(crate) fn make_attributes(
    transaction: &ImmutableTransaction,
    metric_name: &TransactionMetricName,
    apdex_t: Option<Duration>,
    total_time: Duration,
) -> AttributeCollection {
    let mut attributes = AttributeCollection::new();
    let metadata = transaction.metadata();

    attributes.add_intrinsic(
        "name",
        metric_name.prefixed_name().to_string(),
        DEST_TRANSACTION_EVENT | DEST_TRANSACTION_TRACE,
    );
    attributes.add_intrinsic(
        "timestamp",
        (transaction.start_unix_ns() / 1_000_000) as i64,
        DEST_ALL,
    );
    attributes.add_intrinsic(
        "duration",
        transaction.duration().as_secs_f64(),
        DEST_TRANSACTION_EVENT | DEST_ERRORS,
    );
    attributes.add_intrinsic(
        "totalTime",
        total_time.as_secs_f64(),
        DEST_TRANSACTION_EVENT | DEST_TRANSACTION_TRACE,
    );
    if transaction.is_web() {
        attributes.add_intrinsic(
            "webDuration",
            transaction.response_time_or_duration().as_secs_f64(),
            DEST_TRANSACTION_EVENT,
        );
    }
    if let Some(queue_time) = metadata.queue_time {
        attributes.add_intrinsic(
            "queueDuration",
            queue_time.as_secs_f64(),
            DEST_TRANSACTION_EVENT | DEST_ERRORS,
        );
    }

    if let Some(apdex_t) = apdex_t {
        if transaction.is_web() && !transaction.ignore_apdex() {
            attributes.add_intrinsic(
                "nr.apdexPerfZone",
                apdex_zone(transaction.response_time_or_duration(), apdex_t),
                DEST_TRANSACTION_EVENT,
            );
        }
    }

    if let Some(error) = &metadata.error {
        attributes.add_intrinsic("error", true, DEST_TRANSACTION_EVENT);
        attributes.add_intrinsic(
            "errorType",
            error.error_type.clone(),
            DEST_TRANSACTION_EVENT | DEST_ERRORS,
        );
        attributes.add_intrinsic(
            "errorMessage",
            error.message.clone(),
            DEST_TRANSACTION_EVENT | DEST_ERRORS,
        );
        if error.expected {
            attributes.add_intrinsic("error.expected", true, DEST_TRANSACTION_EVENT | DEST_ERRORS);
        }
    } else {
        attributes.add_intrinsic("error", false, DEST_TRANSACTION_EVENT);
    }

    if let Some(tracing_state) = &metadata.tracing_state {
        attributes.add_intrinsic("guid", transaction.guid().to_string(), DEST_ALL);
        attributes.add_intrinsic("traceId", tracing_state.trace_id.clone(), DEST_ALL);
        attributes.add_intrinsic("priority", tracing_state.priority as f64, DEST_ALL);
        attributes.add_intrinsic("sampled", tracing_state.sampled, DEST_ALL);
        if let Some(parent_type) = tracing_state.parent_type {
            attributes.add_intrinsic("parent.type", parent_type.as_str(), DEST_ALL);
            attributes.add_intrinsic(
                "parent.transportType",
                tracing_state.transport_type.as_str(),
                DEST_ALL,
            );
            attributes.add_intrinsic(
                "parent.transportDuration",
                tracing_state.transport_duration.as_secs_f64(),
                DEST_ALL,
            );
        }
        if let Some(account_id) = &tracing_state.parent_account_id {
            attributes.add_intrinsic("parent.account", account_id.clone(), DEST_ALL);
        }
        if let Some(app_id) = &tracing_state.parent_app_id {
            attributes.add_intrinsic("parent.app", app_id.clone(), DEST_ALL);
        }
    }

    if let Some(process_id) = &metadata.cross_application_referrer_process_id {
        attributes.add_intrinsic("client_cross_process_id", process_id.clone(), DEST_ALL);
    }
    if let Some(path_hash) = metadata.cross_application_path_hash {
        attributes.add_intrinsic(
            "nr.pathHash",
            format!("{:08x}", path_hash),
            DEST_TRANSACTION_EVENT,
        );
    }
    if let Some(referrer_path_hash) = metadata.cross_application_referrer_path_hash {
        attributes.add_intrinsic(
            "nr.referringPathHash",
            format!("{:08x}", referrer_path_hash),
            DEST_TRANSACTION_EVENT,
        );
    }

    if let Some(synthetics) = &metadata.synthetics {
        attributes.add_intrinsic(
            "nr.syntheticsResourceId",
            synthetics.resource_id.clone(),
            DEST_TRANSACTION_EVENT | DEST_TRANSACTION_TRACE,
        );
        attributes.add_intrinsic(
            "nr.syntheticsJobId",
            synthetics.job_id.clone(),
            DEST_TRANSACTION_EVENT | DEST_TRANSACTION_TRACE,
        );
        attributes.add_intrinsic(
            "nr.syntheticsMonitorId",
            synthetics.monitor_id.clone(),
            DEST_TRANSACTION_EVENT | DEST_TRANSACTION_TRACE,
        );
    }

    if let Some(uri) = &metadata.uri {
        attributes.add_agent("request.uri", strip_query_string(uri).to_string(), DEST_ALL);
    }
    if let Some(status_code) = metadata.http_response_status_code {
        attributes.add_agent("response.statusCode", status_code as i64, DEST_ALL);
    }

    for (key, value) in &metadata.user_attributes {
        attributes.add_user(key.clone(), value.clone(), DEST_ALL);
    }

    attributes
}

fn apdex_zone(response_time: Duration, apdex_t: Duration) -> &'static str {
    if response_time <= apdex_t {
        "S"
    } else if response_time <= apdex_t * 4 {
        "T"
    } else {
        "F"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::attributes::AttributeClass;
    use crate::attributes::AttributeValue;
    use crate::config::Config;
    use crate::finalizer::MockFinalize;
    use crate::metadata::ErrorData;
    use crate::name::TransactionName;
    use crate::transaction::Transaction;

    fn transaction() -> Arc<Transaction> {
        let mut mock = MockFinalize::new();
        mock.expect_on_transaction_dropped().return_const(());
        Transaction::start(
            Config::default(),
            TransactionName::web("MVC", "Attr"),
            Arc::new(mock),
        )
    }

    fn attributes_of(transaction: &Arc<Transaction>) -> AttributeCollection {
        let snapshot = transaction.to_immutable();
        make_attributes(
            &snapshot,
            &TransactionMetricName::new(snapshot.name()),
            Some(Duration::from_millis(500)),
            Duration::from_millis(42),
        )
    }

    #[test]
    fn uri_is_stripped_of_its_query_string() {
        let transaction = transaction();
        transaction.set_uri("https://example.com/search?q=secret");
        let attributes = attributes_of(&transaction);

        let uri = attributes.get("request.uri").unwrap();
        assert_eq!(uri.class, AttributeClass::Agent);
        assert_eq!(
            uri.value,
            AttributeValue::Str("https://example.com/search".into())
        );
    }

    #[test]
    fn error_state_folds_into_the_collection() {
        let transaction = transaction();
        transaction.notice_error(ErrorData::new("Boom", "it broke"));
        let attributes = attributes_of(&transaction);

        assert_eq!(
            attributes.get("error").unwrap().value,
            AttributeValue::Bool(true)
        );
        assert_eq!(
            attributes.get("errorType").unwrap().value,
            AttributeValue::Str("Boom".into())
        );
        // Error details go to the event and error artifacts, not the trace.
        assert!(attributes
            .for_destination(crate::attributes::DEST_TRANSACTION_TRACE)
            .all(|attribute| attribute.name != "errorType"));
    }

    #[test]
    fn without_error_the_event_says_so() {
        let transaction = transaction();
        let attributes = attributes_of(&transaction);
        assert_eq!(
            attributes.get("error").unwrap().value,
            AttributeValue::Bool(false)
        );
    }

    #[test]
    fn user_attributes_are_carried() {
        let transaction = transaction();
        transaction.add_custom_attribute("customer", "acme");
        let attributes = attributes_of(&transaction);

        let user = attributes.get("customer").unwrap();
        assert_eq!(user.class, AttributeClass::User);
        assert_eq!(user.value, AttributeValue::Str("acme".into()));
    }

    #[test]
    fn web_transactions_get_an_apdex_zone() {
        let transaction = transaction();
        let attributes = attributes_of(&transaction);
        let zone = attributes.get("nr.apdexPerfZone").unwrap();
        assert_eq!(zone.value, AttributeValue::Str("S".into()));
    }
}
