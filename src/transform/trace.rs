// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::borrow::Cow;
use std::time::Duration;

use crate::attributes::AttributeClass;
use crate::attributes::AttributeCollection;
use crate::attributes::AttributeValue;
use crate::attributes::DEST_TRANSACTION_TRACE;
use crate::name::TransactionMetricName;
use crate::transaction::ImmutableTransaction;
use crate::tree::ImmutableSegmentTreeNode;

/// One node of a rendered transaction trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceNode {
    pub entry: Duration,
    pub exit: Duration,
    pub name: String,
    pub parameters: Vec<(Cow<'static, str>, String)>,
    pub children: Vec<TraceNode>,
}

/// A slow-transaction trace: the reconstructed call tree under a single
/// synthetic root, plus the transaction's attributes.
#[derive(Debug, Clone)]
pub struct TransactionTrace {
    pub start_time_unix_ns: u64,
    pub duration: Duration,
    pub guid: String,
    pub root: TraceNode,
    pub intrinsic_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
    pub agent_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
    pub user_attributes: Vec<(Cow<'static, str>, AttributeValue)>,
}

/// A trace plus the priority metadata the trace aggregator samples on. The
/// trace itself is built lazily so transactions that lose the sampling
/// decision never pay for rendering.
pub struct TransactionTraceComponents {
    metric_name: TransactionMetricName,
    duration: Duration,
    is_synthetics: bool,
    build: Box<dyn FnOnce() -> TransactionTrace + Send>,
}

impl TransactionTraceComponents {
    pub fn new(
        metric_name: TransactionMetricName,
        duration: Duration,
        is_synthetics: bool,
        build: Box<dyn FnOnce() -> TransactionTrace + Send>,
    ) -> Self {
        TransactionTraceComponents {
            metric_name,
            duration,
            is_synthetics,
            build,
        }
    }

    #[inline]
    pub fn metric_name(&self) -> &TransactionMetricName {
        &self.metric_name
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[inline]
    pub fn is_synthetics(&self) -> bool {
        self.is_synthetics
    }

    /// Renders the trace. Consumes the components; the aggregator calls this
    /// only for traces that win sampling.
    pub fn build(self) -> TransactionTrace {
        (self.build)()
    }
}

impl std::fmt::Debug for TransactionTraceComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTraceComponents")
            .field("metric_name", &self.metric_name)
            .field("duration", &self.duration)
            .field("is_synthetics", &self.is_synthetics)
            .finish_non_exhaustive()
    }
}

/// Projects a finished transaction and its reconstructed segment forest into
/// a transaction trace.
///
/// Multiple real roots are nested under one faux top-level node so
/// downstream consumers that need a single root are satisfied.
pub(crate) fn make_transaction_trace(
    transaction: &ImmutableTransaction,
    tree_roots: Vec<ImmutableSegmentTreeNode>,
    attributes: &AttributeCollection,
) -> TransactionTrace {
    let root = TraceNode {
        entry: Duration::ZERO,
        exit: transaction.duration(),
        name: "ROOT".to_string(),
        parameters: Vec::new(),
        children: tree_roots.iter().map(trace_node).collect(),
    };

    TransactionTrace {
        start_time_unix_ns: transaction.start_unix_ns(),
        duration: transaction.duration(),
        guid: transaction.guid().to_string(),
        root,
        intrinsic_attributes: attributes
            .class_for_destination(AttributeClass::Intrinsic, DEST_TRANSACTION_TRACE),
        agent_attributes: attributes
            .class_for_destination(AttributeClass::Agent, DEST_TRANSACTION_TRACE),
        user_attributes: attributes
            .class_for_destination(AttributeClass::User, DEST_TRANSACTION_TRACE),
    }
}

fn trace_node(node: &ImmutableSegmentTreeNode) -> TraceNode {
    let segment = node.segment();

    let mut parameters = segment.parameters();
    segment.kind().add_trace_parameters(&mut parameters);
    parameters.push((
        "exclusive_duration_millis".into(),
        node.exclusive_duration().as_millis().to_string(),
    ));
    if segment.is_unfinished() {
        parameters.push(("unfinished".into(), "true".to_string()));
    }

    TraceNode {
        entry: segment.relative_start(),
        exit: segment.calculated_end(),
        name: segment.kind().trace_name(),
        parameters,
        children: node.children().iter().map(trace_node).collect(),
    }
}
