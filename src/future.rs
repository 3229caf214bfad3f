// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! Tools to carry a transaction across a `Future`.
//!
//! The [`FutureExt`] trait extends `Future` with [`in_transaction()`], which
//! binds a transaction to the future and re-attaches it as the current
//! transaction around every poll. Wherever the executor runs the future,
//! [`current_transaction()`](crate::context::current_transaction) and the
//! call stack resolve correctly.
//!
//! [`in_transaction()`]: FutureExt::in_transaction

use std::sync::Arc;
use std::task::Poll;

use pin_project::pin_project;
use pin_project::pinned_drop;

use crate::transaction::Transaction;

impl<T: std::future::Future> FutureExt for T {}

/// An extension trait for `Future`s that provides transaction-attach
/// adapters.
pub trait FutureExt: std::future::Future + Sized {
    /// Binds a [`Transaction`] to the [`Future`], marking the transaction as
    /// asynchronously continued so segments started inside the future parent
    /// under the segment that was current when this was called. The
    /// transaction is held until the future completes or is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use apmtrace::prelude::*;
    ///
    /// # let config = Config::default();
    /// # let transformer = Arc::new(Transformer::new(config.clone(), Aggregators::log()));
    /// # let finalizer = Arc::new(TransactionFinalizer::new(config.clone(), transformer));
    /// let txn = Transaction::start(config, TransactionName::other("Job", "fetch"), finalizer);
    ///
    /// let task = async {
    ///     let current = current_transaction().unwrap();
    ///     let segment = current.start_custom_segment("fetch one page").unwrap();
    ///     // Perform some work.
    ///     current.end_segment(segment);
    /// }
    /// .in_transaction(txn.clone());
    ///
    /// futures::executor::block_on(task);
    /// txn.end();
    /// ```
    ///
    /// [`Future`]: std::future::Future
    #[inline]
    fn in_transaction(self, transaction: Arc<Transaction>) -> InTransaction<Self> {
        transaction.hold();
        drop(transaction.attach_to_async());
        InTransaction {
            inner: self,
            transaction: Some(transaction),
        }
    }
}

/// Adapter for [`FutureExt::in_transaction()`].
#[pin_project(PinnedDrop)]
pub struct InTransaction<T> {
    #[pin]
    inner: T,
    transaction: Option<Arc<Transaction>>,
}

impl<T: std::future::Future> std::future::Future for InTransaction<T> {
    type Output = T::Output;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        let _guard = this
            .transaction
            .as_ref()
            .map(|transaction| transaction.attach());
        let result = this.inner.poll(cx);

        match result {
            Poll::Pending => Poll::Pending,
            other => {
                if let Some(transaction) = this.transaction.take() {
                    transaction.release();
                }
                other
            }
        }
    }
}

#[pinned_drop]
impl<T> PinnedDrop for InTransaction<T> {
    fn drop(self: std::pin::Pin<&mut Self>) {
        // A future dropped before completion still releases its hold, so the
        // transaction can end.
        let this = self.project();
        if let Some(transaction) = this.transaction.take() {
            transaction.release();
        }
    }
}
