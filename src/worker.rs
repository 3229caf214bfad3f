// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::unbounded;
use crossbeam::channel::Sender;
use log::error;

use crate::transaction::Transaction;
use crate::transform::Transform;

/// A dedicated thread that runs transform work off the request thread.
///
/// Ending a transaction must not be held up by artifact generation, so when
/// `complete_transactions_on_thread` is off, finished transactions are queued
/// here and `end()` returns immediately. Completion ordering between the
/// request thread and transform is intentionally decoupled.
pub(crate) struct TransformWorker {
    sender: Option<Sender<Arc<Transaction>>>,
    handle: Option<JoinHandle<()>>,
}

impl TransformWorker {
    pub fn start(transformer: Arc<dyn Transform>) -> Self {
        let (sender, receiver) = unbounded::<Arc<Transaction>>();
        let handle = std::thread::Builder::new()
            .name("apmtrace-transform".to_string())
            .spawn(move || {
                for transaction in receiver.iter() {
                    if catch_unwind(AssertUnwindSafe(|| transformer.transform(&transaction)))
                        .is_err()
                    {
                        error!("transform failed for transaction {}", transaction.guid());
                    }
                }
            })
            .expect("failed to spawn transform worker");

        TransformWorker {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    pub fn submit(&self, transaction: Arc<Transaction>) {
        if let Some(sender) = &self.sender {
            if sender.send(transaction).is_err() {
                error!("transform worker is gone; dropping transaction telemetry");
            }
        }
    }
}

impl Drop for TransformWorker {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain outstanding work and
        // exit.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            // A queued transaction owns its finalizer, so the worker thread
            // itself can end up dropping the last reference to us.
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::config::Config;
    use crate::finalizer::MockFinalize;
    use crate::name::TransactionName;

    struct CountingTransform(Arc<AtomicUsize>);

    impl Transform for CountingTransform {
        fn transform(&self, _transaction: &Transaction) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn worker_transforms_each_submitted_transaction_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let worker = TransformWorker::start(Arc::new(CountingTransform(counter.clone())));

        for _ in 0..3 {
            let mut mock = MockFinalize::new();
            mock.expect_on_transaction_dropped().return_const(());
            let transaction = Transaction::start(
                Config::default(),
                TransactionName::other("Job", "queued"),
                Arc::new(mock),
            );
            transaction.finish();
            worker.submit(transaction);
        }

        // Dropping the worker drains the queue before joining.
        drop(worker);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    struct PanickingTransform;

    impl Transform for PanickingTransform {
        fn transform(&self, _transaction: &Transaction) {
            panic!("boom");
        }
    }

    #[test]
    fn worker_survives_a_panicking_transform() {
        let worker = TransformWorker::start(Arc::new(PanickingTransform));

        let mut mock = MockFinalize::new();
        mock.expect_on_transaction_dropped().return_const(());
        let transaction = Transaction::start(
            Config::default(),
            TransactionName::other("Job", "bad"),
            Arc::new(mock),
        );
        transaction.finish();
        worker.submit(transaction.clone());
        worker.submit(transaction);

        std::thread::sleep(Duration::from_millis(50));
        drop(worker);
    }
}
