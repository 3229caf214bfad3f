// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::borrow::Cow;

use crate::attributes::AttributeClass;
use crate::attributes::AttributeCollection;
use crate::attributes::AttributeValue;
use crate::attributes::DEST_TRANSACTION_EVENT;
use crate::transaction::ImmutableTransaction;

/// One analytics event per finished transaction.
#[derive(Debug, Clone)]
pub struct TransactionEvent {
    pub timestamp_unix_ns: u64,
    pub intrinsic_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
    pub agent_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
    pub user_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
}

impl TransactionEvent {
    pub fn intrinsic(&self, name: &str) -> Option<&AttributeValue> {
        self.intrinsic_attributes
            .iter()
            .find(|(attribute, _)| *attribute == name)
            .map(|(_, value)| value)
    }
}

pub(crate) fn make_transaction_event(
    transaction: &ImmutableTransaction,
    attributes: &AttributeCollection,
) -> TransactionEvent {
    let mut intrinsic_attributes =
        attributes.class_for_destination(AttributeClass::Intrinsic, DEST_TRANSACTION_EVENT);
    intrinsic_attributes.insert(0, ("type".into(), AttributeValue::Str("Transaction".into())));

    TransactionEvent {
        timestamp_unix_ns: transaction.start_unix_ns(),
        intrinsic_attributes,
        agent_attributes: attributes
            .class_for_destination(AttributeClass::Agent, DEST_TRANSACTION_EVENT),
        user_attributes: attributes
            .class_for_destination(AttributeClass::User, DEST_TRANSACTION_EVENT),
    }
}
