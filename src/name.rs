// Copyright 2024 TiKV Project Authors. Licensed under Apache-2.0.

//! Transaction naming.
//!
//! A transaction accumulates name candidates while it runs. Each candidate
//! carries a priority; a later candidate replaces the current one only if its
//! priority is strictly higher, and once the transaction finishes the name is
//! frozen for good.

use std::fmt;

/// Relative weight of a name candidate. Higher wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NamePriority {
    Uri = 1,
    StatusCode = 2,
    Handler = 3,
    Route = 4,
    FrameworkLow = 5,
    FrameworkHigh = 6,
    UserTransactionName = 8,
}

/// The name of one logical unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionName {
    Web { category: String, name: String },
    Other { category: String, name: String },
}

impl TransactionName {
    pub fn web(category: impl Into<String>, name: impl Into<String>) -> Self {
        TransactionName::Web {
            category: category.into(),
            name: name.into(),
        }
    }

    pub fn other(category: impl Into<String>, name: impl Into<String>) -> Self {
        TransactionName::Other {
            category: category.into(),
            name: name.into(),
        }
    }

    #[inline]
    pub fn is_web(&self) -> bool {
        matches!(self, TransactionName::Web { .. })
    }

    /// The `category/name` suffix shared by the metric name and the apdex
    /// metric name.
    pub fn suffix(&self) -> String {
        match self {
            TransactionName::Web { category, name }
            | TransactionName::Other { category, name } => format!("{}/{}", category, name),
        }
    }
}

/// The fully resolved metric name of a finished transaction, as produced by
/// the naming rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMetricName {
    prefixed_name: String,
    is_web: bool,
    should_ignore: bool,
}

impl TransactionMetricName {
    pub fn new(name: &TransactionName) -> Self {
        let prefix = if name.is_web() {
            "WebTransaction"
        } else {
            "OtherTransaction"
        };
        TransactionMetricName {
            prefixed_name: format!("{}/{}", prefix, name.suffix()),
            is_web: name.is_web(),
            should_ignore: false,
        }
    }

    /// Marks the transaction as ignored by naming rules. The transformer
    /// aborts the whole pipeline for such a name.
    pub fn ignored(name: &TransactionName) -> Self {
        TransactionMetricName {
            should_ignore: true,
            ..Self::new(name)
        }
    }

    #[inline]
    pub fn prefixed_name(&self) -> &str {
        &self.prefixed_name
    }

    #[inline]
    pub fn is_web(&self) -> bool {
        self.is_web
    }

    #[inline]
    pub fn should_ignore(&self) -> bool {
        self.should_ignore
    }

    /// The apdex rollup name for this transaction, e.g.
    /// `Apdex/MVC/Home/Index` for `WebTransaction/MVC/Home/Index`.
    pub fn apdex_name(&self) -> String {
        let suffix = self
            .prefixed_name
            .splitn(2, '/')
            .nth(1)
            .unwrap_or(&self.prefixed_name);
        format!("Apdex/{}", suffix)
    }
}

impl fmt::Display for TransactionMetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed_name)
    }
}

/// The mutable naming state owned by a running transaction.
#[derive(Debug)]
pub(crate) struct CandidateTransactionName {
    current: TransactionName,
    priority: NamePriority,
    frozen: bool,
}

impl CandidateTransactionName {
    pub fn new(initial: TransactionName) -> Self {
        Self {
            current: initial,
            priority: NamePriority::Uri,
            frozen: false,
        }
    }

    /// Replaces the current candidate if `priority` is strictly higher and
    /// the name is not frozen. Returns whether the candidate was accepted.
    pub fn try_set(&mut self, name: TransactionName, priority: NamePriority) -> bool {
        if self.frozen || priority <= self.priority {
            return false;
        }
        self.current = name;
        self.priority = priority;
        true
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[inline]
    pub fn current(&self) -> &TransactionName {
        &self.current
    }
}
