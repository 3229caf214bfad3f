// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! Cross-request metadata carried by a transaction: error state, request
//! facts, synthetics markers, cross-application tracing and distributed
//! tracing participation.
//!
//! Decoding the headers that populate these fields is out of scope; the
//! fields arrive here already parsed.

use std::time::Duration;

/// One recorded application error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorData {
    pub error_type: String,
    pub message: String,
    /// Expected errors still produce error artifacts but do not count toward
    /// error metrics or frustrate the apdex score.
    pub expected: bool,
}

impl ErrorData {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorData {
            error_type: error_type.into(),
            message: message.into(),
            expected: false,
        }
    }

    pub fn expected(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        ErrorData {
            expected: true,
            ..Self::new(error_type, message)
        }
    }
}

/// How a distributed trace payload reached this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    Http,
    Https,
    Kafka,
    Amqp,
    Queue,
    Other,
}

impl TransportType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportType::Http => "HTTP",
            TransportType::Https => "HTTPS",
            TransportType::Kafka => "Kafka",
            TransportType::Amqp => "AMQP",
            TransportType::Queue => "Queue",
            TransportType::Other => "Unknown",
        }
    }
}

/// The kind of caller that produced an inbound distributed trace payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentType {
    App,
    Browser,
    Mobile,
}

impl ParentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParentType::App => "App",
            ParentType::Browser => "Browser",
            ParentType::Mobile => "Mobile",
        }
    }
}

/// Distributed tracing participation, populated when an inbound payload was
/// accepted or when this transaction starts a new trace.
#[derive(Debug, Clone, PartialEq)]
pub struct TracingState {
    pub trace_id: String,
    pub parent_type: Option<ParentType>,
    pub parent_account_id: Option<String>,
    pub parent_app_id: Option<String>,
    pub parent_span_id: Option<String>,
    pub transport_type: TransportType,
    pub transport_duration: Duration,
    pub sampled: bool,
    pub priority: f32,
}

/// Synthetics monitor markers decoded from an inbound synthetics header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticsData {
    pub resource_id: String,
    pub job_id: String,
    pub monitor_id: String,
}

/// The mutable metadata half of a running transaction. Frozen into an
/// [`ImmutableTransactionMetadata`] when the transaction converts to its
/// immutable snapshot.
#[derive(Debug, Default)]
pub(crate) struct TransactionMetadata {
    pub uri: Option<String>,
    pub queue_time: Option<Duration>,
    pub http_response_status_code: Option<u16>,
    pub error: Option<ErrorData>,
    pub synthetics: Option<SyntheticsData>,
    pub tracing_state: Option<TracingState>,
    pub cross_application_referrer_process_id: Option<String>,
    pub cross_application_referrer_path_hash: Option<u32>,
    pub cross_application_path_hash: Option<u32>,
    pub cross_application_response_time: Option<Duration>,
    pub user_attributes: Vec<(String, String)>,
}

impl TransactionMetadata {
    /// Records an error. A non-expected error displaces an expected one, but
    /// the first non-expected error wins over later ones.
    pub fn record_error(&mut self, error: ErrorData) {
        match &self.error {
            Some(current) if !current.expected => {}
            _ => self.error = Some(error),
        }
    }

    pub fn freeze(&self) -> ImmutableTransactionMetadata {
        ImmutableTransactionMetadata {
            uri: self.uri.clone(),
            queue_time: self.queue_time,
            http_response_status_code: self.http_response_status_code,
            error: self.error.clone(),
            synthetics: self.synthetics.clone(),
            tracing_state: self.tracing_state.clone(),
            cross_application_referrer_process_id: self
                .cross_application_referrer_process_id
                .clone(),
            cross_application_referrer_path_hash: self.cross_application_referrer_path_hash,
            cross_application_path_hash: self.cross_application_path_hash,
            cross_application_response_time: self.cross_application_response_time,
            user_attributes: self.user_attributes.clone(),
        }
    }
}

/// Read-only metadata snapshot consumed by the transformer and the makers.
#[derive(Debug, Clone, Default)]
pub struct ImmutableTransactionMetadata {
    pub uri: Option<String>,
    pub queue_time: Option<Duration>,
    pub http_response_status_code: Option<u16>,
    pub error: Option<ErrorData>,
    pub synthetics: Option<SyntheticsData>,
    pub tracing_state: Option<TracingState>,
    pub cross_application_referrer_process_id: Option<String>,
    pub cross_application_referrer_path_hash: Option<u32>,
    pub cross_application_path_hash: Option<u32>,
    pub cross_application_response_time: Option<Duration>,
    pub user_attributes: Vec<(String, String)>,
}

impl ImmutableTransactionMetadata {
    #[inline]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    #[inline]
    pub fn is_synthetics(&self) -> bool {
        self.synthetics.is_some()
    }
}

/// Derives this transaction's cross-application path hash from its final
/// name and the referring path hash, if any.
pub(crate) fn calculate_path_hash(transaction_name: &str, referrer_path_hash: Option<u32>) -> u32 {
    let referrer = referrer_path_hash.unwrap_or(0);
    referrer.rotate_left(1) ^ string_hash(transaction_name)
}

fn string_hash(s: &str) -> u32 {
    // djb2, kept dependency-free and stable across processes.
    s.bytes()
        .fold(5381u32, |hash, b| hash.wrapping_mul(33).wrapping_add(b as u32))
}
