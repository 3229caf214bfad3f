// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! The tracing core of an application-performance-monitoring agent.
//!
//! `apmtrace` records a tree of timed operations ("segments") performed
//! during one logical unit of work (a "transaction"), reconstructs their
//! parent/child structure after the fact, computes timing statistics, and
//! hands the result to a transform pipeline that emits metrics, a
//! transaction trace, a transaction event, error artifacts and SQL traces.
//!
//! ## Transaction and segments
//!
//!   A [`Transaction`] is created per unit of work (an HTTP request, a
//!   background job, a handled message). Instrumentation starts typed
//!   segments against it; the per-context call stack assigns each new
//!   segment its parent.
//!
//!   ```
//!   use std::sync::Arc;
//!   use apmtrace::prelude::*;
//!
//!   let config = Config::default();
//!   let transformer = Arc::new(Transformer::new(config.clone(), Aggregators::log()));
//!   let finalizer = Arc::new(TransactionFinalizer::new(config.clone(), transformer));
//!
//!   let txn = Transaction::start(config, TransactionName::web("MVC", "Home/Index"), finalizer);
//!
//!   let controller = txn.start_method_segment("HomeController", "Index").unwrap();
//!   let query = txn
//!       .start_datastore_segment(
//!           DatastoreData::new("MySQL", "SELECT")
//!               .model("users")
//!               .command_text("SELECT * FROM users WHERE id = 1"),
//!       )
//!       .unwrap();
//!   txn.end_segment(query);
//!   txn.end_segment(controller);
//!
//!   // Ending the transaction finishes it exactly once and runs the
//!   // transform pipeline.
//!   txn.end();
//!   ```
//!
//! ## Asynchronous continuations
//!
//!   Work that hops threads keeps appending to the same transaction. Either
//!   wrap the future with [`FutureExt::in_transaction`], or call
//!   [`Transaction::attach_to_async`] so threads that first touch the
//!   transaction inherit the right parent segment. A transaction stays open
//!   while [`Transaction::hold`]s are outstanding.
//!
//! ## Leak recovery
//!
//!   A transaction abandoned without `end()` is recovered when its last
//!   reference drops: its duration is estimated from the recorded segments,
//!   finalization runs exactly once, and the transform pipeline still emits
//!   telemetry. Recovery never panics through the drop boundary.

pub mod attributes;
pub mod config;
pub mod context;
pub mod error;
pub mod finalizer;
pub mod future;
pub mod metadata;
pub mod metrics;
pub mod name;
pub mod segment;
pub mod transaction;
pub mod transform;
pub mod tree;

pub(crate) mod call_stack;
pub(crate) mod worker;

pub use crate::config::Config;
pub use crate::config::RecordSql;
pub use crate::error::SegmentError;
pub use crate::finalizer::TransactionFinalizer;
pub use crate::future::FutureExt;
pub use crate::name::NamePriority;
pub use crate::name::TransactionName;
pub use crate::segment::DatastoreData;
pub use crate::segment::SegmentHandle;
pub use crate::segment::SegmentId;
pub use crate::transaction::ImmutableTransaction;
pub use crate::transaction::Transaction;
pub use crate::transform::Aggregators;
pub use crate::transform::Transformer;

/// A "batteries included" import.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::config::RecordSql;
    pub use crate::context::current_transaction;
    pub use crate::finalizer::TransactionFinalizer;
    pub use crate::future::FutureExt;
    pub use crate::metadata::ErrorData;
    pub use crate::name::NamePriority;
    pub use crate::name::TransactionName;
    pub use crate::segment::BrokerAction;
    pub use crate::segment::DatastoreData;
    pub use crate::segment::DestinationType;
    pub use crate::segment::SegmentHandle;
    pub use crate::transaction::Transaction;
    pub use crate::transform::Aggregators;
    pub use crate::transform::Transformer;
}
