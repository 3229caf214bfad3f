// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::cmp;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use log::error;

use crate::config::Config;
use crate::metadata::calculate_path_hash;
use crate::name::TransactionMetricName;
use crate::transaction::Transaction;
use crate::transform::HealthReporter;
use crate::transform::LogSink;
use crate::transform::Transform;
use crate::worker::TransformWorker;

/// The transaction-side view of the finalization machinery.
///
/// A transaction calls back into this when its unit-of-work counter drains
/// ([`finish`](Finalize::finish) followed by
/// [`dispatch_transform`](Finalize::dispatch_transform)) and when it is
/// dropped without ever being ended
/// ([`on_transaction_dropped`](Finalize::on_transaction_dropped)).
#[cfg_attr(test, mockall::automock)]
pub trait Finalize: Send + Sync + 'static {
    /// Marks the transaction cleanly finished. Exactly one caller across all
    /// threads observes `true`.
    fn finish(&self, transaction: &Transaction) -> bool;

    /// Hands a finished transaction to the transform pipeline, on this
    /// thread or on the background worker per configuration.
    fn dispatch_transform(&self, transaction: Arc<Transaction>);

    /// Leak recovery. Runs inside `Drop` and therefore must never panic
    /// through.
    fn on_transaction_dropped(&self, transaction: &Transaction);
}

/// Ends transactions either cleanly or via leak recovery, guaranteeing
/// at-most-once finalization either way.
///
/// The leak-recovery path exists because instrumentation cannot be trusted
/// to always reach `end()`: a request may be abandoned, a continuation may
/// never run. When the last reference to such a transaction is dropped, the
/// recovery estimates an end time from the segments it did record, forces
/// the duration, finishes, reports health telemetry and transforms. Every
/// failure along the way is swallowed, because it executes during drop.
pub struct TransactionFinalizer {
    config: Config,
    transformer: Arc<dyn Transform>,
    health: Arc<dyn HealthReporter>,
    worker: Option<TransformWorker>,
}

impl TransactionFinalizer {
    pub fn new(config: Config, transformer: Arc<dyn Transform>) -> Self {
        let worker = if config.complete_transactions_on_thread {
            None
        } else {
            Some(TransformWorker::start(transformer.clone()))
        };
        TransactionFinalizer {
            config,
            transformer,
            health: Arc::new(LogSink),
            worker,
        }
    }

    pub fn with_health_reporter(mut self, health: Arc<dyn HealthReporter>) -> Self {
        self.health = health;
        self
    }

    /// The later of "last segment started" and "last segment finished",
    /// which is the best available estimate of when a leaked transaction
    /// actually stopped doing work.
    fn estimate_duration(&self, transaction: &Transaction) -> Duration {
        let immutable = transaction.to_immutable();
        let last_started = immutable
            .live_segments()
            .map(|segment| segment.relative_start())
            .max();
        let last_finished = immutable
            .live_segments()
            .filter_map(|segment| segment.relative_end())
            .max();
        let estimate = cmp::max(last_started, last_finished).unwrap_or(Duration::ZERO);
        cmp::max(estimate, self.config.leaked_duration_floor)
    }

    fn update_path_hash(&self, transaction: &Transaction) {
        let immutable_name = transaction.to_immutable().name().clone();
        let metric_name = TransactionMetricName::new(&immutable_name);
        let path_hash = calculate_path_hash(
            metric_name.prefixed_name(),
            transaction.cross_application_referrer_path_hash(),
        );
        transaction.set_cross_application_path_hash(path_hash);
    }
}

impl Finalize for TransactionFinalizer {
    fn finish(&self, transaction: &Transaction) -> bool {
        self.update_path_hash(transaction);
        transaction.finish()
    }

    fn dispatch_transform(&self, transaction: Arc<Transaction>) {
        match &self.worker {
            Some(worker) => worker.submit(transaction),
            None => {
                if catch_unwind(AssertUnwindSafe(|| self.transformer.transform(&transaction)))
                    .is_err()
                {
                    error!("transform failed for transaction {}", transaction.guid());
                }
            }
        }
    }

    fn on_transaction_dropped(&self, transaction: &Transaction) {
        let duration = self.estimate_duration(transaction);
        transaction.force_duration(duration);

        if !self.finish(transaction) {
            // Someone else finished it between the drop check and now.
            return;
        }

        debug!(
            "recovering leaked transaction {} with estimated duration {:?}",
            transaction.guid(),
            duration
        );
        self.health
            .report_transaction_leaked(transaction.guid(), duration);

        if catch_unwind(AssertUnwindSafe(|| self.transformer.transform(transaction))).is_err() {
            error!(
                "transform failed while recovering leaked transaction {}",
                transaction.guid()
            );
        }
    }
}
