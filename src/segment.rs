// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::metadata::ErrorData;
use crate::metrics::MetricStatsCollection;

/// An identifier for a segment within a transaction.
///
/// Ids are dense and assigned in creation order, so a segment's id doubles as
/// its index into the transaction's segment list.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SegmentId(pub u32);

impl SegmentId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// The result of running an explain plan against a datastore.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExplainPlan {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A collaborator capable of producing an explain plan for one datastore
/// call. Supplied by instrumentation when it still holds a usable connection;
/// invoked best-effort by the transform pipeline for slow segments.
pub trait ExplainPlanSource: Send + Sync + 'static {
    fn explain(&self) -> Result<ExplainPlan, Box<dyn std::error::Error + Send + Sync>>;
}

/// Identifying data of one datastore call.
pub struct DatastoreData {
    pub vendor: String,
    pub model: Option<String>,
    pub operation: String,
    pub command_text: Option<String>,
    pub host: Option<String>,
    pub database_name: Option<String>,
    pub(crate) explain_source: Option<Arc<dyn ExplainPlanSource>>,
    pub(crate) explain_plan: OnceCell<ExplainPlan>,
}

impl DatastoreData {
    pub fn new(vendor: impl Into<String>, operation: impl Into<String>) -> Self {
        DatastoreData {
            vendor: vendor.into(),
            model: None,
            operation: operation.into(),
            command_text: None,
            host: None,
            database_name: None,
            explain_source: None,
            explain_plan: OnceCell::new(),
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn command_text(mut self, command_text: impl Into<String>) -> Self {
        self.command_text = Some(command_text.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn database_name(mut self, database_name: impl Into<String>) -> Self {
        self.database_name = Some(database_name.into());
        self
    }

    pub fn explain_source(mut self, source: Arc<dyn ExplainPlanSource>) -> Self {
        self.explain_source = Some(source);
        self
    }

    pub fn explain_plan(&self) -> Option<&ExplainPlan> {
        self.explain_plan.get()
    }
}

impl Clone for DatastoreData {
    fn clone(&self) -> Self {
        let explain_plan = OnceCell::new();
        if let Some(plan) = self.explain_plan.get() {
            let _ = explain_plan.set(plan.clone());
        }
        DatastoreData {
            vendor: self.vendor.clone(),
            model: self.model.clone(),
            operation: self.operation.clone(),
            command_text: self.command_text.clone(),
            host: self.host.clone(),
            database_name: self.database_name.clone(),
            explain_source: self.explain_source.clone(),
            explain_plan,
        }
    }
}

impl fmt::Debug for DatastoreData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatastoreData")
            .field("vendor", &self.vendor)
            .field("model", &self.model)
            .field("operation", &self.operation)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Kinds of message broker destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationType {
    Queue,
    Topic,
    TempQueue,
    TempTopic,
}

impl DestinationType {
    fn as_str(self) -> &'static str {
        match self {
            DestinationType::Queue => "Queue",
            DestinationType::Topic => "Topic",
            DestinationType::TempQueue => "TempQueue",
            DestinationType::TempTopic => "TempTopic",
        }
    }
}

/// What the instrumented code did with the message broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerAction {
    Produce,
    Consume,
    Peek,
    Purge,
}

impl BrokerAction {
    fn as_str(self) -> &'static str {
        match self {
            BrokerAction::Produce => "Produce",
            BrokerAction::Consume => "Consume",
            BrokerAction::Peek => "Peek",
            BrokerAction::Purge => "Purge",
        }
    }
}

/// The typed payload of a segment, dispatched by variant wherever the
/// artifact makers need operation-specific naming, parameters or metrics.
#[derive(Debug, Clone)]
pub enum SegmentKind {
    Custom {
        name: String,
    },
    Method {
        type_name: String,
        method_name: String,
    },
    Simple {
        name: String,
    },
    MessageBroker {
        vendor: String,
        destination: Option<String>,
        destination_type: DestinationType,
        action: BrokerAction,
    },
    Datastore(DatastoreData),
    External {
        uri: String,
        method: String,
    },
}

impl SegmentKind {
    /// The name this operation carries in a transaction trace and in its
    /// scoped metric.
    pub fn trace_name(&self) -> String {
        match self {
            SegmentKind::Custom { name } => format!("Custom/{}", name),
            SegmentKind::Method {
                type_name,
                method_name,
            } => format!("Method/{}/{}", type_name, method_name),
            SegmentKind::Simple { name } => name.clone(),
            SegmentKind::MessageBroker {
                vendor,
                destination,
                destination_type,
                action,
            } => match destination {
                Some(destination) => format!(
                    "MessageBroker/{}/{}/{}/Named/{}",
                    vendor,
                    destination_type.as_str(),
                    action.as_str(),
                    destination
                ),
                None => format!(
                    "MessageBroker/{}/{}/{}/Temp",
                    vendor,
                    destination_type.as_str(),
                    action.as_str()
                ),
            },
            SegmentKind::Datastore(data) => match &data.model {
                Some(model) => format!(
                    "Datastore/statement/{}/{}/{}",
                    data.vendor, model, data.operation
                ),
                None => format!("Datastore/operation/{}/{}", data.vendor, data.operation),
            },
            SegmentKind::External { uri, method } => {
                format!("External/{}/{}", host_of(uri), method)
            }
        }
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        matches!(self, SegmentKind::External { .. })
    }

    /// Operation identity used by the sibling-combination pass. Two segments
    /// are only merged when their kinds are similar per this check.
    pub(crate) fn is_similar_to(&self, other: &SegmentKind) -> bool {
        match (self, other) {
            (SegmentKind::Custom { name: a }, SegmentKind::Custom { name: b }) => a == b,
            (SegmentKind::Simple { name: a }, SegmentKind::Simple { name: b }) => a == b,
            (
                SegmentKind::Method {
                    type_name: t1,
                    method_name: m1,
                },
                SegmentKind::Method {
                    type_name: t2,
                    method_name: m2,
                },
            ) => t1 == t2 && m1 == m2,
            (
                SegmentKind::MessageBroker {
                    vendor: v1,
                    destination: d1,
                    destination_type: t1,
                    action: a1,
                },
                SegmentKind::MessageBroker {
                    vendor: v2,
                    destination: d2,
                    destination_type: t2,
                    action: a2,
                },
            ) => v1 == v2 && d1 == d2 && t1 == t2 && a1 == a2,
            (SegmentKind::Datastore(a), SegmentKind::Datastore(b)) => {
                a.vendor == b.vendor && a.model == b.model && a.operation == b.operation
            }
            (
                SegmentKind::External {
                    uri: u1,
                    method: m1,
                },
                SegmentKind::External {
                    uri: u2,
                    method: m2,
                },
            ) => m1 == m2 && host_of(u1) == host_of(u2),
            _ => false,
        }
    }

    /// Appends operation-specific display parameters for the transaction
    /// trace.
    pub(crate) fn add_trace_parameters(&self, parameters: &mut Vec<(Cow<'static, str>, String)>) {
        match self {
            SegmentKind::External { uri, .. } => {
                parameters.push(("uri".into(), strip_query_string(uri).to_string()));
            }
            SegmentKind::Datastore(data) => {
                if let Some(host) = &data.host {
                    parameters.push(("host".into(), host.clone()));
                }
                if let Some(database_name) = &data.database_name {
                    parameters.push(("database_name".into(), database_name.clone()));
                }
            }
            _ => {}
        }
    }

    /// Rolls this operation up into the transaction's metric statistics.
    pub(crate) fn add_metric_stats(
        &self,
        duration: Duration,
        exclusive: Duration,
        stats: &mut MetricStatsCollection,
    ) {
        stats.record_scoped(self.trace_name(), duration, exclusive);

        match self {
            SegmentKind::Datastore(data) => {
                stats.record_unscoped("Datastore/all", duration, exclusive);
                stats.record_unscoped(format!("Datastore/{}/all", data.vendor), duration, exclusive);
                stats.record_unscoped(
                    format!("Datastore/operation/{}/{}", data.vendor, data.operation),
                    duration,
                    exclusive,
                );
            }
            SegmentKind::External { uri, .. } => {
                let host = host_of(uri);
                stats.record_unscoped("External/all", duration, exclusive);
                stats.record_unscoped(format!("External/{}/all", host), duration, exclusive);
            }
            _ => {}
        }
    }
}

/// Returns the authority part of an absolute uri, without userinfo.
pub(crate) fn host_of(uri: &str) -> &str {
    let rest = match uri.find("://") {
        Some(scheme_end) => &uri[scheme_end + 3..],
        None => uri,
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    authority.split(':').next().unwrap_or(authority)
}

/// Cuts the query string off a uri for display, since query strings may hold
/// sensitive request data.
pub(crate) fn strip_query_string(uri: &str) -> &str {
    uri.split(['?', '#']).next().unwrap_or(uri)
}

const UNSET_NS: u64 = u64::MAX;

/// An immutable-after-finish record of one timed operation within a
/// transaction.
///
/// Segments form the nodes of the eventual call tree. All timing fields are
/// relative to the transaction's start. The end time and the child-duration
/// accumulator are the only fields written after creation, and both are
/// written through atomics: a segment may be ended by a different thread than
/// the one that created it, concurrently with the transform pipeline reading
/// it.
pub struct Segment {
    id: SegmentId,
    parent_id: Option<SegmentId>,
    kind: SegmentKind,
    combinable: AtomicBool,
    leaf: AtomicBool,
    start: Duration,
    // Relative end time in nanoseconds, UNSET_NS while unfinished. Written at
    // most once.
    end_ns: AtomicU64,
    // Sum of finished children's durations, for exclusive-time bookkeeping.
    child_duration_ns: AtomicU64,
    // Latch: a child's duration is folded into its parent exactly once.
    parent_notified: AtomicBool,
    // Set when the transform pipeline had to force this segment to finish.
    unfinished: AtomicBool,
    // The execution context that created this segment; used to guess whether
    // a child ran synchronously with its parent.
    context_id: u64,
    error: Mutex<Option<ErrorData>>,
    parameters: Mutex<Vec<(Cow<'static, str>, String)>>,
}

impl Segment {
    pub(crate) fn new(
        id: SegmentId,
        parent_id: Option<SegmentId>,
        kind: SegmentKind,
        start: Duration,
        context_id: u64,
    ) -> Self {
        Segment {
            id,
            parent_id,
            kind,
            combinable: AtomicBool::new(false),
            leaf: AtomicBool::new(false),
            start,
            end_ns: AtomicU64::new(UNSET_NS),
            child_duration_ns: AtomicU64::new(0),
            parent_notified: AtomicBool::new(false),
            unfinished: AtomicBool::new(false),
            context_id,
            error: Mutex::new(None),
            parameters: Mutex::new(Vec::new()),
        }
    }

    /// Builds a synthetic segment standing in for a group of merged
    /// siblings. It reuses this segment's identity and kind but carries its
    /// own timing and parameters.
    pub(crate) fn create_similar(
        &self,
        start: Duration,
        duration: Duration,
        parameters: Vec<(Cow<'static, str>, String)>,
    ) -> Segment {
        Segment {
            id: self.id,
            parent_id: self.parent_id,
            kind: self.kind.clone(),
            combinable: AtomicBool::new(self.is_combinable()),
            leaf: AtomicBool::new(false),
            start,
            end_ns: AtomicU64::new((start + duration).as_nanos() as u64),
            child_duration_ns: AtomicU64::new(0),
            parent_notified: AtomicBool::new(false),
            unfinished: AtomicBool::new(false),
            context_id: self.context_id,
            error: Mutex::new(None),
            parameters: Mutex::new(parameters),
        }
    }

    #[inline]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    #[inline]
    pub fn parent_id(&self) -> Option<SegmentId> {
        self.parent_id
    }

    #[inline]
    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    #[inline]
    pub fn is_combinable(&self) -> bool {
        self.combinable.load(Ordering::Relaxed)
    }

    pub(crate) fn set_combinable(&self, combinable: bool) {
        self.combinable.store(combinable, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.leaf.load(Ordering::Relaxed)
    }

    pub(crate) fn set_leaf(&self, leaf: bool) {
        self.leaf.store(leaf, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_external(&self) -> bool {
        self.kind.is_external()
    }

    #[inline]
    pub(crate) fn context_id(&self) -> u64 {
        self.context_id
    }

    #[inline]
    pub fn relative_start(&self) -> Duration {
        self.start
    }

    /// The relative end time, if the segment has been ended.
    pub fn relative_end(&self) -> Option<Duration> {
        match self.end_ns.load(Ordering::Acquire) {
            UNSET_NS => None,
            ns => Some(Duration::from_nanos(ns)),
        }
    }

    /// The relative end time, falling back to the start time while the
    /// segment is still open.
    pub fn calculated_end(&self) -> Duration {
        self.relative_end().unwrap_or(self.start)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.relative_end()
            .map(|end| end.saturating_sub(self.start))
    }

    #[inline]
    pub fn duration_or_zero(&self) -> Duration {
        self.duration().unwrap_or(Duration::ZERO)
    }

    /// Writes the end time. Returns false if the segment had already ended,
    /// in which case nothing changes.
    pub(crate) fn end_with(&self, end: Duration) -> bool {
        self.end_ns
            .compare_exchange(
                UNSET_NS,
                end.as_nanos() as u64,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Ends a segment that instrumentation never ended. Marks it unfinished
    /// so the trace can say so.
    pub(crate) fn force_end(&self, end: Duration) -> bool {
        let forced = self.end_with(end);
        if forced {
            self.unfinished.store(true, Ordering::Release);
        }
        forced
    }

    #[inline]
    pub fn is_unfinished(&self) -> bool {
        self.unfinished.load(Ordering::Acquire)
    }

    /// Total duration of this segment's finished children.
    pub fn total_child_duration(&self) -> Duration {
        Duration::from_nanos(self.child_duration_ns.load(Ordering::Acquire))
    }

    /// This segment's own duration minus its children's, floored at zero.
    /// Only meaningful once all descendants have finished.
    pub fn exclusive_duration_or_zero(&self) -> Duration {
        self.duration_or_zero()
            .saturating_sub(self.total_child_duration())
    }

    /// Called on the parent when a child segment finishes.
    ///
    /// We are attempting to guess whether the child was called synchronously:
    /// `context_id` is the context the parent started on, `ending_context` is
    /// the context the child's end was observed on. Asynchronous children do
    /// not deduct from their parent; their time is accounted through total
    /// time instead.
    pub(crate) fn child_finished(&self, child: &Segment, ending_context: u64) {
        let child_executed_synchronously = self.context_id == ending_context;
        if child_executed_synchronously
            && child
                .parent_notified
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.child_duration_ns.fetch_add(
                child.duration_or_zero().as_nanos() as u64,
                Ordering::AcqRel,
            );
        }
    }

    pub(crate) fn set_error(&self, error: ErrorData) {
        *self.error.lock() = Some(error);
    }

    pub fn error(&self) -> Option<ErrorData> {
        self.error.lock().clone()
    }

    /// Attaches an arbitrary display parameter carried into the transaction
    /// trace.
    pub(crate) fn set_parameter(&self, key: impl Into<Cow<'static, str>>, value: String) {
        self.parameters.lock().push((key.into(), value));
    }

    pub fn parameters(&self) -> Vec<(Cow<'static, str>, String)> {
        self.parameters.lock().clone()
    }

    pub(crate) fn is_combinable_with(&self, other: &Segment) -> bool {
        self.is_combinable() && other.is_combinable() && self.kind.is_similar_to(&other.kind)
    }

    pub(crate) fn add_metric_stats(&self, stats: &mut MetricStatsCollection) {
        if let Some(duration) = self.duration() {
            self.kind
                .add_metric_stats(duration, self.exclusive_duration_or_zero(), stats);
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("kind", &self.kind)
            .field("start", &self.start)
            .field("end", &self.relative_end())
            .finish_non_exhaustive()
    }
}

/// A handle to a started segment, returned by the transaction's segment
/// starters.
///
/// Starting a segment on an ignored transaction yields a no-op handle that
/// never touches the transaction again.
#[must_use]
#[derive(Debug, Default)]
pub struct SegmentHandle {
    pub(crate) inner: Option<Arc<Segment>>,
}

impl SegmentHandle {
    /// A handle that never records anything.
    #[inline]
    pub fn noop() -> Self {
        SegmentHandle { inner: None }
    }

    pub(crate) fn new(segment: Arc<Segment>) -> Self {
        SegmentHandle {
            inner: Some(segment),
        }
    }

    #[inline]
    pub fn is_noop(&self) -> bool {
        self.inner.is_none()
    }

    #[inline]
    pub fn id(&self) -> Option<SegmentId> {
        self.inner.as_ref().map(|segment| segment.id())
    }

    /// Attaches a display parameter to the underlying segment. A no-op on a
    /// no-op handle.
    pub fn set_parameter(&self, key: impl Into<Cow<'static, str>>, value: impl Into<String>) {
        if let Some(segment) = &self.inner {
            segment.set_parameter(key, value.into());
        }
    }

    /// Marks the segment eligible for merging with adjacent similar siblings
    /// when the call tree is reconstructed.
    pub fn make_combinable(&self) {
        if let Some(segment) = &self.inner {
            segment.set_combinable(true);
        }
    }

    /// Marks the segment as a leaf: segments started while it is the current
    /// segment are not recorded.
    pub fn make_leaf(&self) {
        if let Some(segment) = &self.inner {
            segment.set_leaf(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(name: &str) -> SegmentKind {
        SegmentKind::Custom {
            name: name.to_string(),
        }
    }

    #[test]
    fn end_time_is_write_once() {
        let segment = Segment::new(SegmentId(0), None, custom("a"), Duration::ZERO, 0);
        assert!(segment.end_with(Duration::from_millis(10)));
        assert!(!segment.end_with(Duration::from_millis(99)));
        assert_eq!(segment.relative_end(), Some(Duration::from_millis(10)));
        assert_eq!(segment.duration(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn force_end_marks_unfinished_only_when_it_forced() {
        let ended = Segment::new(SegmentId(0), None, custom("a"), Duration::ZERO, 0);
        ended.end_with(Duration::from_millis(5));
        assert!(!ended.force_end(Duration::from_millis(9)));
        assert!(!ended.is_unfinished());

        let dangling = Segment::new(SegmentId(1), None, custom("b"), Duration::ZERO, 0);
        assert!(dangling.force_end(Duration::from_millis(9)));
        assert!(dangling.is_unfinished());
    }

    #[test]
    fn exclusive_time_subtracts_synchronous_children() {
        let parent = Segment::new(SegmentId(0), None, custom("parent"), Duration::ZERO, 7);
        parent.end_with(Duration::from_millis(100));

        let child = Segment::new(
            SegmentId(1),
            Some(SegmentId(0)),
            custom("child"),
            Duration::from_millis(10),
            7,
        );
        child.end_with(Duration::from_millis(40));

        parent.child_finished(&child, 7);
        // Duplicate notification must not double-count.
        parent.child_finished(&child, 7);

        assert_eq!(parent.total_child_duration(), Duration::from_millis(30));
        assert_eq!(
            parent.exclusive_duration_or_zero(),
            Duration::from_millis(70)
        );
    }

    #[test]
    fn asynchronous_child_does_not_deduct() {
        let parent = Segment::new(SegmentId(0), None, custom("parent"), Duration::ZERO, 7);
        parent.end_with(Duration::from_millis(100));

        let child = Segment::new(
            SegmentId(1),
            Some(SegmentId(0)),
            custom("child"),
            Duration::from_millis(10),
            8,
        );
        child.end_with(Duration::from_millis(40));

        parent.child_finished(&child, 8);
        assert_eq!(parent.total_child_duration(), Duration::ZERO);
        assert_eq!(
            parent.exclusive_duration_or_zero(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn exclusive_time_never_negative() {
        let parent = Segment::new(SegmentId(0), None, custom("parent"), Duration::ZERO, 7);
        parent.end_with(Duration::from_millis(10));

        let child = Segment::new(
            SegmentId(1),
            Some(SegmentId(0)),
            custom("child"),
            Duration::ZERO,
            7,
        );
        child.end_with(Duration::from_millis(25));

        parent.child_finished(&child, 7);
        assert_eq!(parent.exclusive_duration_or_zero(), Duration::ZERO);
    }

    #[test]
    fn trace_names() {
        assert_eq!(custom("work").trace_name(), "Custom/work");
        assert_eq!(
            SegmentKind::Method {
                type_name: "Controller".into(),
                method_name: "Index".into(),
            }
            .trace_name(),
            "Method/Controller/Index"
        );
        assert_eq!(
            SegmentKind::External {
                uri: "https://api.example.com:443/v1/users?id=3".into(),
                method: "GET".into(),
            }
            .trace_name(),
            "External/api.example.com/GET"
        );
        assert_eq!(
            SegmentKind::Datastore(DatastoreData::new("MySQL", "SELECT").model("users"))
                .trace_name(),
            "Datastore/statement/MySQL/users/SELECT"
        );
        assert_eq!(
            SegmentKind::MessageBroker {
                vendor: "RabbitMQ".into(),
                destination: Some("orders".into()),
                destination_type: DestinationType::Queue,
                action: BrokerAction::Produce,
            }
            .trace_name(),
            "MessageBroker/RabbitMQ/Queue/Produce/Named/orders"
        );
    }

    #[test]
    fn similarity_is_per_operation_identity() {
        let a = SegmentKind::Datastore(DatastoreData::new("MySQL", "SELECT").model("users"));
        let b = SegmentKind::Datastore(
            DatastoreData::new("MySQL", "SELECT")
                .model("users")
                .command_text("SELECT * FROM users"),
        );
        let c = SegmentKind::Datastore(DatastoreData::new("MySQL", "INSERT").model("users"));
        assert!(a.is_similar_to(&b));
        assert!(!a.is_similar_to(&c));
        assert!(!a.is_similar_to(&custom("users")));
    }

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://example.com/path"), "example.com");
        assert_eq!(host_of("https://user@example.com:8080/p?q=1"), "example.com");
        assert_eq!(host_of("example.com/path"), "example.com");
    }

    #[test]
    fn query_string_is_stripped() {
        assert_eq!(
            strip_query_string("https://example.com/p?secret=1"),
            "https://example.com/p"
        );
        assert_eq!(strip_query_string("https://example.com/p"), "https://example.com/p");
    }
}
