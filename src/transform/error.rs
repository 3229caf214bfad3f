// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::borrow::Cow;

use crate::attributes::AttributeClass;
use crate::attributes::AttributeCollection;
use crate::attributes::AttributeValue;
use crate::attributes::DEST_ERROR_EVENT;
use crate::attributes::DEST_ERROR_TRACE;
use crate::name::TransactionMetricName;
use crate::transaction::ImmutableTransaction;

/// An error trace: the recorded error plus the transaction context it
/// happened in.
#[derive(Debug, Clone)]
pub struct ErrorTrace {
    pub timestamp_unix_ns: u64,
    /// The transaction's final metric name.
    pub path: String,
    pub message: String,
    pub error_type: String,
    pub guid: String,
    pub intrinsic_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
    pub agent_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
    pub user_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
}

/// One analytics event per collected error.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub timestamp_unix_ns: u64,
    pub intrinsic_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
    pub agent_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
    pub user_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
}

/// Builds the error trace for a transaction whose metadata recorded an
/// error. Returns `None` when no error was recorded; the transformer guards
/// on that before calling, so `None` here means a caller bug upstream was
/// tolerated.
pub(crate) fn make_error_trace(
    transaction: &ImmutableTransaction,
    metric_name: &TransactionMetricName,
    attributes: &AttributeCollection,
) -> Option<ErrorTrace> {
    let error = transaction.metadata().error.as_ref()?;

    Some(ErrorTrace {
        timestamp_unix_ns: transaction.start_unix_ns(),
        path: metric_name.prefixed_name().to_string(),
        message: error.message.clone(),
        error_type: error.error_type.clone(),
        guid: transaction.guid().to_string(),
        intrinsic_attributes: attributes
            .class_for_destination(AttributeClass::Intrinsic, DEST_ERROR_TRACE),
        agent_attributes: attributes.class_for_destination(AttributeClass::Agent, DEST_ERROR_TRACE),
        user_attributes: attributes.class_for_destination(AttributeClass::User, DEST_ERROR_TRACE),
    })
}

pub(crate) fn make_error_event(
    transaction: &ImmutableTransaction,
    metric_name: &TransactionMetricName,
    attributes: &AttributeCollection,
) -> Option<ErrorEvent> {
    let error = transaction.metadata().error.as_ref()?;

    let mut intrinsic_attributes =
        attributes.class_for_destination(AttributeClass::Intrinsic, DEST_ERROR_EVENT);
    let mut prepend = vec![
        (
            Cow::from("type"),
            AttributeValue::Str("TransactionError".into()),
        ),
        (
            "error.class".into(),
            AttributeValue::Str(error.error_type.clone().into()),
        ),
        (
            "error.message".into(),
            AttributeValue::Str(error.message.clone().into()),
        ),
        ("error.expected".into(), AttributeValue::Bool(error.expected)),
        (
            "transactionName".into(),
            AttributeValue::Str(metric_name.prefixed_name().to_string().into()),
        ),
    ];
    prepend.append(&mut intrinsic_attributes);

    Some(ErrorEvent {
        timestamp_unix_ns: transaction.start_unix_ns(),
        intrinsic_attributes: prepend,
        agent_attributes: attributes.class_for_destination(AttributeClass::Agent, DEST_ERROR_EVENT),
        user_attributes: attributes.class_for_destination(AttributeClass::User, DEST_ERROR_EVENT),
    })
}
