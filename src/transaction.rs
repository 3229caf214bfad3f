// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use log::debug;
use log::error;
use minstant::Anchor;
use minstant::Instant;
use parking_lot::Mutex;

use crate::call_stack::CallStackManager;
use crate::config::Config;
use crate::config::RecordSql;
use crate::context;
use crate::context::AttachGuard;
use crate::error::SegmentError;
use crate::finalizer::Finalize;
use crate::metadata::ErrorData;
use crate::metadata::ImmutableTransactionMetadata;
use crate::metadata::SyntheticsData;
use crate::metadata::TracingState;
use crate::metadata::TransactionMetadata;
use crate::name::CandidateTransactionName;
use crate::name::NamePriority;
use crate::name::TransactionName;
use crate::segment::BrokerAction;
use crate::segment::DatastoreData;
use crate::segment::DestinationType;
use crate::segment::Segment;
use crate::segment::SegmentHandle;
use crate::segment::SegmentId;
use crate::segment::SegmentKind;

const MAX_SEGMENT_NAME_LEN: usize = 255;
const UNSET_NS: u64 = u64::MAX;

/// One logical unit of work being traced: an HTTP request, a background job,
/// a handled message, an invocation.
///
/// A `Transaction` is the mutable aggregate while work executes. It owns the
/// full segment list (append-only, indexed by segment id), the call stack
/// manager that assigns parent ids, naming state, metadata, and the
/// unit-of-work counter that keeps it alive across asynchronous
/// continuations. Any application thread may mutate it; nothing here assumes
/// an owning thread.
///
/// Dropping the last reference to a transaction whose [`end`](Self::end) was
/// never reached triggers leak recovery through the finalizer, so abandoned
/// transactions still report telemetry instead of vanishing.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use apmtrace::prelude::*;
///
/// let config = Config::default();
/// let transformer = Arc::new(Transformer::new(config.clone(), Aggregators::log()));
/// let finalizer = Arc::new(TransactionFinalizer::new(config.clone(), transformer));
///
/// let txn = Transaction::start(config, TransactionName::web("MVC", "Home/Index"), finalizer);
/// let segment = txn.start_custom_segment("load dashboard").unwrap();
/// txn.end_segment(segment);
/// txn.end();
/// ```
pub struct Transaction {
    guid: String,
    config: Config,
    start_instant: Instant,
    start_unix_ns: u64,
    segments: Mutex<Vec<Option<Arc<Segment>>>>,
    call_stack: CallStackManager,
    name: Mutex<CandidateTransactionName>,
    metadata: Mutex<TransactionMetadata>,
    unit_of_work_count: AtomicI32,
    nested_transaction_attempts: AtomicI32,
    ignored: AtomicBool,
    ignore_apdex: AtomicBool,
    finished: AtomicBool,
    finish_lock: Mutex<()>,
    finished_duration: Mutex<Option<Duration>>,
    forced_duration: Mutex<Option<Duration>>,
    response_time_ns: AtomicU64,
    finalizer: Arc<dyn Finalize>,
    // Back-reference to the owning Arc, for handing the transaction to the
    // transform worker and the context slot.
    self_weak: Weak<Transaction>,
}

impl Transaction {
    /// Creates a transaction and returns the shared handle instrumentation
    /// works against.
    pub fn start(
        config: Config,
        initial_name: TransactionName,
        finalizer: Arc<dyn Finalize>,
    ) -> Arc<Transaction> {
        let start_instant = Instant::now();
        let anchor = Anchor::new();
        Arc::new_cyclic(|self_weak| Transaction {
            guid: generate_guid(),
            config,
            start_instant,
            start_unix_ns: start_instant.as_unix_nanos(&anchor),
            segments: Mutex::new(Vec::new()),
            call_stack: CallStackManager::new(),
            name: Mutex::new(CandidateTransactionName::new(initial_name)),
            metadata: Mutex::new(TransactionMetadata::default()),
            unit_of_work_count: AtomicI32::new(1),
            nested_transaction_attempts: AtomicI32::new(0),
            ignored: AtomicBool::new(false),
            ignore_apdex: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            finish_lock: Mutex::new(()),
            finished_duration: Mutex::new(None),
            forced_duration: Mutex::new(None),
            response_time_ns: AtomicU64::new(UNSET_NS),
            finalizer,
            self_weak: self_weak.clone(),
        })
    }

    #[inline]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// The transaction's duration up to now.
    #[inline]
    pub fn relative_time(&self) -> Duration {
        self.start_instant.elapsed()
    }

    // ---- segment starters -------------------------------------------------

    /// Starts a custom segment. The name is trimmed, stripped of a leading
    /// `Custom/` and clamped to 255 characters.
    pub fn start_custom_segment(&self, name: &str) -> Result<SegmentHandle, SegmentError> {
        if self.is_ignored() {
            return Ok(SegmentHandle::noop());
        }
        let name = name.trim();
        let name = name.strip_prefix("Custom/").unwrap_or(name);
        if name.is_empty() {
            return Err(SegmentError::EmptyName);
        }
        Ok(self.start_segment(SegmentKind::Custom {
            name: clamp(name, MAX_SEGMENT_NAME_LEN),
        }))
    }

    pub fn start_method_segment(
        &self,
        type_name: &str,
        method_name: &str,
    ) -> Result<SegmentHandle, SegmentError> {
        if self.is_ignored() {
            return Ok(SegmentHandle::noop());
        }
        if type_name.is_empty() || method_name.is_empty() {
            return Err(SegmentError::EmptyMethodName);
        }
        Ok(self.start_segment(SegmentKind::Method {
            type_name: clamp(type_name, MAX_SEGMENT_NAME_LEN),
            method_name: clamp(method_name, MAX_SEGMENT_NAME_LEN),
        }))
    }

    /// Starts a segment that carries its display name verbatim.
    pub fn start_simple_segment(&self, name: &str) -> Result<SegmentHandle, SegmentError> {
        if self.is_ignored() {
            return Ok(SegmentHandle::noop());
        }
        if name.is_empty() {
            return Err(SegmentError::EmptyName);
        }
        Ok(self.start_segment(SegmentKind::Simple {
            name: clamp(name, MAX_SEGMENT_NAME_LEN),
        }))
    }

    pub fn start_datastore_segment(
        &self,
        data: DatastoreData,
    ) -> Result<SegmentHandle, SegmentError> {
        if self.is_ignored() {
            return Ok(SegmentHandle::noop());
        }
        if data.operation.is_empty() {
            return Err(SegmentError::EmptyDatastoreOperation);
        }
        Ok(self.start_segment(SegmentKind::Datastore(data)))
    }

    /// Starts an external-request segment. The uri must be absolute.
    pub fn start_external_segment(
        &self,
        uri: &str,
        method: &str,
    ) -> Result<SegmentHandle, SegmentError> {
        if self.is_ignored() {
            return Ok(SegmentHandle::noop());
        }
        if !uri.contains("://") {
            return Err(SegmentError::RelativeUri(uri.to_string()));
        }
        Ok(self.start_segment(SegmentKind::External {
            uri: uri.to_string(),
            method: method.to_string(),
        }))
    }

    pub fn start_message_broker_segment(
        &self,
        vendor: &str,
        destination: Option<&str>,
        destination_type: DestinationType,
        action: BrokerAction,
    ) -> Result<SegmentHandle, SegmentError> {
        if self.is_ignored() {
            return Ok(SegmentHandle::noop());
        }
        if vendor.is_empty() {
            return Err(SegmentError::EmptyName);
        }
        Ok(self.start_segment(SegmentKind::MessageBroker {
            vendor: vendor.to_string(),
            destination: destination.map(str::to_string),
            destination_type,
            action,
        }))
    }

    /// Allocates the next segment id, wires up the parent from the current
    /// context's call stack, appends and returns a handle.
    fn start_segment(&self, kind: SegmentKind) -> SegmentHandle {
        let parent_id = self.call_stack.try_peek();
        let start = self.relative_time();
        let context_id = context::current_context_id();

        let mut segments = self.segments.lock();

        // A leaf parent swallows its children.
        if let Some(parent) = parent_id.and_then(|id| lookup(&segments, id)) {
            if parent.is_leaf() {
                return SegmentHandle::noop();
            }
        }

        let id = SegmentId(segments.len() as u32);
        let segment = Arc::new(Segment::new(id, parent_id, kind, start, context_id));
        segments.push(Some(segment.clone()));
        drop(segments);

        self.call_stack.push(id);
        SegmentHandle::new(segment)
    }

    /// Ends a segment: records its end time, pops the call stack and lets
    /// the parent fold the child's duration into its exclusive-time
    /// bookkeeping.
    ///
    /// Ending a segment of an ignored or already finished transaction is a
    /// harmless no-op, as is ending a segment twice.
    pub fn end_segment(&self, handle: SegmentHandle) {
        if let Some(segment) = handle.inner {
            self.finish_segment(&segment, None);
        }
    }

    /// Like [`end_segment`](Self::end_segment), additionally attaching an
    /// error observed while the segment ran.
    pub fn end_segment_with_error(&self, handle: SegmentHandle, error: ErrorData) {
        if let Some(segment) = handle.inner {
            self.finish_segment(&segment, Some(error));
        }
    }

    fn finish_segment(&self, segment: &Arc<Segment>, error: Option<ErrorData>) {
        if self.is_ignored() || self.is_finished() {
            return;
        }
        if let Some(error) = error {
            segment.set_error(error.clone());
            self.notice_error(error);
        }
        if !segment.end_with(self.relative_time()) {
            // Already ended, possibly force-finished by the pipeline.
            return;
        }
        self.call_stack_pop(segment, true);
    }

    /// Removes a segment from the current context's call stack without
    /// ending it, so a continuation can end it later from another context.
    pub fn detach_segment(&self, handle: &SegmentHandle) {
        if let Some(segment) = &handle.inner {
            self.call_stack.try_pop(segment.id());
        }
    }

    fn call_stack_pop(&self, segment: &Arc<Segment>, notify_parent: bool) {
        self.call_stack.try_pop(segment.id());
        if !notify_parent {
            return;
        }

        let mut segments = self.segments.lock();
        if segment.id().index() >= self.config.transaction_tracer_max_segments {
            // Over the segment limit: release the finished segment's slot to
            // bound memory. Children already linked by id tolerate the hole.
            segments[segment.id().index()] = None;
        }
        let parent = segment.parent_id().and_then(|id| lookup(&segments, id));
        drop(segments);

        if let Some(parent) = parent {
            parent.child_finished(segment, context::current_context_id());
        }
    }

    /// The deepest open segment from the current context's point of view.
    pub fn current_segment(&self) -> SegmentHandle {
        let id = match self.call_stack.try_peek() {
            Some(id) => id,
            None => return SegmentHandle::noop(),
        };
        match lookup(&self.segments.lock(), id) {
            Some(segment) => SegmentHandle::new(segment),
            None => SegmentHandle::noop(),
        }
    }

    // ---- unit-of-work accounting ------------------------------------------

    pub fn notice_unit_of_work_begins(&self) -> i32 {
        self.unit_of_work_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn notice_unit_of_work_ends(&self) -> i32 {
        self.unit_of_work_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn unit_of_work_count(&self) -> i32 {
        self.unit_of_work_count.load(Ordering::Acquire)
    }

    pub fn notice_nested_transaction_attempt(&self) -> i32 {
        self.nested_transaction_attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn nested_transaction_attempts(&self) -> i32 {
        self.nested_transaction_attempts.load(Ordering::Acquire)
    }

    /// Keeps the transaction alive across an asynchronous continuation
    /// started before the primary unit of work completes.
    pub fn hold(&self) {
        self.notice_unit_of_work_begins();
    }

    /// Releases a [`hold`](Self::hold). The transaction ends when the last
    /// outstanding unit of work is released.
    pub fn release(&self) {
        self.end_with_options(false);
    }

    // ---- async context ----------------------------------------------------

    /// Makes this transaction resolvable as the current transaction on this
    /// execution context and marks its call stack as asynchronously
    /// continued, so other contexts transparently inherit the right parent
    /// segment.
    pub fn attach_to_async(&self) -> AttachGuard {
        self.call_stack.attach_to_async();
        self.attach()
    }

    /// Attaches without marking an async continuation; segments started on
    /// other contexts stay parentless.
    pub fn attach(&self) -> AttachGuard {
        match self.self_weak.upgrade() {
            Some(transaction) => context::attach(&transaction),
            None => AttachGuard::noop(),
        }
    }

    /// Stops seeding new execution contexts from the async attach point.
    pub fn detach(&self) {
        self.call_stack.detach();
        context::clear_current(self);
    }

    pub fn is_attached_to_async(&self) -> bool {
        self.call_stack.is_attached_to_async()
    }

    // ---- naming and metadata ----------------------------------------------

    /// Offers a name candidate. Returns whether it replaced the current one.
    pub fn set_name(&self, name: TransactionName, priority: NamePriority) -> bool {
        self.name.lock().try_set(name, priority)
    }

    pub(crate) fn freeze_name(&self) {
        self.name.lock().freeze();
    }

    pub fn notice_error(&self, error: ErrorData) {
        self.metadata.lock().record_error(error);
    }

    pub fn set_uri(&self, uri: impl Into<String>) {
        self.metadata.lock().uri = Some(uri.into());
    }

    pub fn set_queue_time(&self, queue_time: Duration) {
        self.metadata.lock().queue_time = Some(queue_time);
    }

    pub fn set_http_response_status_code(&self, status_code: u16) {
        self.metadata.lock().http_response_status_code = Some(status_code);
    }

    pub fn set_synthetics(&self, synthetics: SyntheticsData) {
        self.metadata.lock().synthetics = Some(synthetics);
    }

    pub fn set_tracing_state(&self, tracing_state: TracingState) {
        self.metadata.lock().tracing_state = Some(tracing_state);
    }

    pub fn set_cross_application_referrer(
        &self,
        process_id: impl Into<String>,
        path_hash: Option<u32>,
        response_time: Option<Duration>,
    ) {
        let mut metadata = self.metadata.lock();
        metadata.cross_application_referrer_process_id = Some(process_id.into());
        metadata.cross_application_referrer_path_hash = path_hash;
        metadata.cross_application_response_time = response_time;
    }

    pub(crate) fn set_cross_application_path_hash(&self, path_hash: u32) {
        self.metadata.lock().cross_application_path_hash = Some(path_hash);
    }

    pub(crate) fn cross_application_referrer_path_hash(&self) -> Option<u32> {
        self.metadata.lock().cross_application_referrer_path_hash
    }

    pub fn add_custom_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata
            .lock()
            .user_attributes
            .push((key.into(), value.into()));
    }

    // ---- ignore / apdex ----------------------------------------------------

    /// Functionally cancels the transaction: every later segment start
    /// returns a no-op handle and transform never runs for it.
    pub fn ignore(&self) {
        self.ignored.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_ignored(&self) -> bool {
        self.ignored.load(Ordering::Acquire)
    }

    pub fn ignore_apdex(&self) {
        self.ignore_apdex.store(true, Ordering::Release);
    }

    // ---- finalization ------------------------------------------------------

    /// Captures the response time if it has not been captured yet. The first
    /// `end()` captures it; the duration keeps running until the last unit
    /// of work is released.
    pub fn try_capture_response_time(&self) -> bool {
        self.response_time_ns
            .compare_exchange(
                UNSET_NS,
                self.relative_time().as_nanos() as u64,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn response_time(&self) -> Option<Duration> {
        match self.response_time_ns.load(Ordering::Acquire) {
            UNSET_NS => None,
            ns => Some(Duration::from_nanos(ns)),
        }
    }

    /// Ends the primary unit of work. When the outstanding-work counter
    /// reaches zero the transaction is finished through the finalizer and
    /// handed to the transform pipeline, on this thread or on the
    /// background worker, per configuration. Callers must not assume
    /// transform has run by the time this returns.
    pub fn end(&self) {
        self.end_with_options(true);
    }

    fn end_with_options(&self, capture_response_time: bool) {
        if self.is_finished() {
            debug!("transaction {} has already been ended", self.guid);
            return;
        }

        if capture_response_time {
            self.try_capture_response_time();
        }

        if self.notice_unit_of_work_ends() > 0 {
            return;
        }

        if !self.finalizer.finish(self) {
            return;
        }

        context::clear_current(self);
        if let Some(transaction) = self.self_weak.upgrade() {
            self.finalizer.dispatch_transform(transaction);
        }
    }

    /// Transitions finished `false -> true` exactly once.
    ///
    /// The double-checked flag plus lock matters: an application thread and
    /// the leak-recovery path can race here, and every caller after the
    /// first winner must observe `false`.
    pub fn finish(&self) -> bool {
        if self.finished.load(Ordering::Acquire) {
            return false;
        }
        let _guard = self.finish_lock.lock();
        if self.finished.load(Ordering::Acquire) {
            return false;
        }

        *self.finished_duration.lock() = Some(self.relative_time());
        self.freeze_name();
        self.finished.store(true, Ordering::Release);
        true
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Forces the transaction's duration regardless of how long it actually
    /// ran. Used by leak recovery to bound an abandoned transaction's
    /// reported duration.
    pub fn force_duration(&self, duration: Duration) {
        *self.forced_duration.lock() = Some(duration);
    }

    /// Appends a pre-built segment, for tests that need exact timing.
    #[cfg(test)]
    pub(crate) fn push_segment_for_test(
        &self,
        build: impl FnOnce(SegmentId) -> Segment,
    ) -> SegmentId {
        let mut segments = self.segments.lock();
        let id = SegmentId(segments.len() as u32);
        segments.push(Some(Arc::new(build(id))));
        id
    }

    /// Converts to the read-only snapshot consumed by the transformer and
    /// the makers.
    pub fn to_immutable(&self) -> ImmutableTransaction {
        let duration = (*self.forced_duration.lock())
            .or(*self.finished_duration.lock())
            .unwrap_or_else(|| self.relative_time());

        ImmutableTransaction {
            name: self.name.lock().current().clone(),
            guid: self.guid.clone(),
            segments: self.segments.lock().clone(),
            metadata: self.metadata.lock().freeze(),
            start_unix_ns: self.start_unix_ns,
            start_instant: self.start_instant,
            duration,
            response_time: self.response_time(),
            ignore_apdex: self.ignore_apdex.load(Ordering::Acquire),
            record_sql: self.config.record_sql,
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_finished() {
            return;
        }
        // Leak recovery must never panic past the drop boundary: a panic
        // while unwinding aborts the process.
        let finalizer = self.finalizer.clone();
        if catch_unwind(AssertUnwindSafe(|| finalizer.on_transaction_dropped(self))).is_err() {
            error!(
                "leak recovery panicked; telemetry for transaction {} was dropped",
                self.guid
            );
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("guid", &self.guid)
            .field("ignored", &self.is_ignored())
            .field("finished", &self.is_finished())
            .field("segments", &self.segments.lock().len())
            .finish_non_exhaustive()
    }
}

fn lookup(segments: &[Option<Arc<Segment>>], id: SegmentId) -> Option<Arc<Segment>> {
    segments.get(id.index()).cloned().flatten()
}

fn clamp(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn generate_guid() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// A read-only snapshot of a finished (or finishing) transaction.
#[derive(Debug)]
pub struct ImmutableTransaction {
    name: TransactionName,
    guid: String,
    segments: Vec<Option<Arc<Segment>>>,
    metadata: ImmutableTransactionMetadata,
    start_unix_ns: u64,
    start_instant: Instant,
    duration: Duration,
    response_time: Option<Duration>,
    ignore_apdex: bool,
    record_sql: RecordSql,
}

impl ImmutableTransaction {
    #[inline]
    pub fn name(&self) -> &TransactionName {
        &self.name
    }

    #[inline]
    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// The raw segment list, creation-ordered and indexed by id. Slots past
    /// the max-segment cap are `None`.
    #[inline]
    pub fn segments(&self) -> &[Option<Arc<Segment>>] {
        &self.segments
    }

    /// Segments that still have content, in creation order.
    pub fn live_segments(&self) -> impl Iterator<Item = &Arc<Segment>> {
        self.segments.iter().flatten()
    }

    /// The number of segment ids ever issued, counting capped-out slots.
    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, id: SegmentId) -> Option<&Arc<Segment>> {
        self.segments.get(id.index()).and_then(Option::as_ref)
    }

    #[inline]
    pub fn metadata(&self) -> &ImmutableTransactionMetadata {
        &self.metadata
    }

    #[inline]
    pub fn is_web(&self) -> bool {
        self.name.is_web()
    }

    #[inline]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[inline]
    pub fn response_time(&self) -> Option<Duration> {
        self.response_time
    }

    /// Response time for web transactions that captured one, duration
    /// otherwise. This value drives the transaction and apdex metrics.
    pub fn response_time_or_duration(&self) -> Duration {
        self.response_time.unwrap_or(self.duration)
    }

    #[inline]
    pub fn start_unix_ns(&self) -> u64 {
        self.start_unix_ns
    }

    /// Time since the transaction started, used when force-finishing
    /// dangling segments.
    pub fn relative_now(&self) -> Duration {
        self.start_instant.elapsed()
    }

    #[inline]
    pub fn ignore_apdex(&self) -> bool {
        self.ignore_apdex
    }

    #[inline]
    pub fn record_sql(&self) -> RecordSql {
        self.record_sql
    }
}
