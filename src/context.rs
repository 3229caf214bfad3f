// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! Execution-context plumbing.
//!
//! Two concerns live here: a stable id for the current execution context
//! (used by the call stack manager to keep per-context stack views), and the
//! thread-local "current transaction" slot that instrumentation reads when
//! it has no transaction reference of its own.
//!
//! The slot holds a [`Weak`] reference on purpose: context storage must
//! never keep an abandoned transaction alive, otherwise leak recovery could
//! not observe the abandonment.

use std::cell::Cell;
use std::cell::RefCell;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use crate::transaction::Transaction;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXT_ID: Cell<u64> = Cell::new(0);
    static CURRENT_TRANSACTION: RefCell<Weak<Transaction>> = RefCell::new(Weak::new());
}

/// A stable id for the current execution context. Today a context is a
/// thread; the indirection keeps the call stack manager ignorant of that.
pub(crate) fn current_context_id() -> u64 {
    CONTEXT_ID.with(|cell| {
        let mut id = cell.get();
        if id == 0 {
            id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
            cell.set(id);
        }
        id
    })
}

/// The transaction attached to the current execution context, if it is still
/// alive.
pub fn current_transaction() -> Option<Arc<Transaction>> {
    CURRENT_TRANSACTION
        .try_with(|slot| slot.borrow().upgrade())
        .ok()
        .flatten()
}

/// Sets `transaction` as the current transaction for this context and
/// returns a guard that restores the previous one when dropped.
pub(crate) fn attach(transaction: &Arc<Transaction>) -> AttachGuard {
    let previous = CURRENT_TRANSACTION
        .try_with(|slot| slot.replace(Arc::downgrade(transaction)))
        .ok();
    AttachGuard { previous }
}

/// Clears the slot if it still points at `transaction`. Called when a
/// transaction ends so the context cannot resolve a finished transaction.
pub(crate) fn clear_current(transaction: &Transaction) {
    let _ = CURRENT_TRANSACTION.try_with(|slot| {
        let matches = slot
            .borrow()
            .upgrade()
            .is_some_and(|current| std::ptr::eq(current.as_ref(), transaction));
        if matches {
            *slot.borrow_mut() = Weak::new();
        }
    });
}

/// A guard created by [`Transaction::attach`](crate::Transaction::attach).
#[must_use]
pub struct AttachGuard {
    previous: Option<Weak<Transaction>>,
}

impl AttachGuard {
    /// A guard that restores nothing, used when there is no live handle to
    /// attach.
    pub(crate) fn noop() -> AttachGuard {
        AttachGuard { previous: None }
    }
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            let _ = CURRENT_TRANSACTION.try_with(|slot| *slot.borrow_mut() = previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_stable_per_thread_and_distinct_across_threads() {
        let here = current_context_id();
        assert_eq!(here, current_context_id());

        let there = std::thread::spawn(current_context_id).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn slot_is_empty_by_default() {
        std::thread::spawn(|| assert!(current_transaction().is_none()))
            .join()
            .unwrap();
    }
}
