// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use thiserror::Error;

/// A caller-contract violation raised while constructing a segment request.
///
/// These errors fail fast at the instrumentation call site, before any
/// transaction state is touched. Everything that can go wrong *after* a
/// segment exists is tolerated and logged instead, because instrumentation
/// runs inside arbitrary host application code and must not break it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("segment name must not be empty")]
    EmptyName,
    #[error("method segment requires a type name and a method name")]
    EmptyMethodName,
    #[error("datastore segment requires an operation")]
    EmptyDatastoreOperation,
    #[error("external segment requires an absolute uri, got {0:?}")]
    RelativeUri(String),
}
